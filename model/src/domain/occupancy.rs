/// Share of `allocatable` taken by `requested`, as a raw ratio.
///
/// `None` when the node reports no positive capacity for the resource. There
/// is no clamp: over-commitment yields ratios above 1.
pub fn occupancy_fraction(requested: f64, allocatable: f64) -> Option<f64> {
    if allocatable.is_nan() || allocatable <= 0.0 {
        return None;
    }
    Some(requested / allocatable)
}

/// [`occupancy_fraction`] expressed as a percentage.
pub fn occupancy(requested: f64, allocatable: f64) -> Option<f64> {
    occupancy_fraction(requested, allocatable).map(|ratio| ratio * 100.0)
}
