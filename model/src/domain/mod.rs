pub mod aggregation;
pub mod occupancy;
pub mod score;
