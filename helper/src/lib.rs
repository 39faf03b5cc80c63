pub mod init;
pub mod pool;
pub mod prom_metrics;
pub mod quantity;
