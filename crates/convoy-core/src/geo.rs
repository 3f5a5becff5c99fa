//! Spatial math for lag detection and distance display.

/// Mean Earth radius in meters (spherical approximation).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Calculate distance between two points in meters using the Haversine formula.
///
/// Standard great-circle distance on a spherical Earth. Inputs are decimal
/// degrees; the result is symmetric and zero for identical points.
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lng2 - lng1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Arithmetic-mean centroid of a set of lat/lng points.
///
/// Not geodesically exact; the error is negligible at the sub-kilometer
/// spreads this engine targets. Returns `None` for an empty slice.
pub fn mean_centroid(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.is_empty() {
        return None;
    }
    let count = points.len() as f64;
    let (sum_lat, sum_lng) = points
        .iter()
        .fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
    Some((sum_lat / count, sum_lng / count))
}

/// Offset a position by distance and bearing.
///
/// # Arguments
/// * `lat`, `lng` - Starting position in degrees
/// * `distance_m` - Distance in meters
/// * `bearing_rad` - Bearing in radians (0 = north, π/2 = east)
///
/// # Returns
/// (new_lat, new_lng) in degrees
pub fn offset_by_bearing(lat: f64, lng: f64, distance_m: f64, bearing_rad: f64) -> (f64, f64) {
    if distance_m.abs() <= f64::EPSILON {
        return (lat, lng);
    }

    let lat1 = lat.to_radians();
    let lng1 = lng.to_radians();
    let angular_distance = distance_m / EARTH_RADIUS_M;

    let sin_lat1 = lat1.sin();
    let cos_lat1 = lat1.cos();
    let sin_ad = angular_distance.sin();
    let cos_ad = angular_distance.cos();

    let sin_lat2 = sin_lat1 * cos_ad + cos_lat1 * sin_ad * bearing_rad.cos();
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();

    let y = bearing_rad.sin() * sin_ad * cos_lat1;
    let x = cos_ad - sin_lat1 * sin_lat2;
    let mut lng2 = lng1 + y.atan2(x);
    lng2 =
        (lng2 + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI) - std::f64::consts::PI;

    (lat2.to_degrees(), lng2.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_point_is_zero() {
        let dist = haversine_distance(19.0760, 72.8777, 19.0760, 72.8777);
        assert!(dist < 0.001);
    }

    #[test]
    fn distance_is_symmetric() {
        let d1 = haversine_distance(19.0760, 72.8777, 19.0860, 72.8900);
        let d2 = haversine_distance(19.0860, 72.8900, 19.0760, 72.8777);
        assert!((d1 - d2).abs() < 1e-9);
    }

    #[test]
    fn hundredth_degree_latitude_at_equator() {
        // 0.01 degree of latitude is ~1113m; must land within 1%.
        let dist = haversine_distance(0.0, 0.0, 0.01, 0.0);
        assert!(
            (dist - 1113.0).abs() < 11.13,
            "expected ~1113m, got {dist}"
        );
    }

    #[test]
    fn monotonic_with_angular_separation() {
        let near = haversine_distance(0.0, 0.0, 0.01, 0.0);
        let far = haversine_distance(0.0, 0.0, 0.02, 0.0);
        assert!(far > near);
    }

    #[test]
    fn centroid_of_symmetric_points() {
        let points = [(0.0, 0.0), (0.02, 0.0), (0.0, 0.02), (0.02, 0.02)];
        let (lat, lng) = mean_centroid(&points).unwrap();
        assert!((lat - 0.01).abs() < 1e-12);
        assert!((lng - 0.01).abs() < 1e-12);
    }

    #[test]
    fn centroid_of_empty_set_is_undefined() {
        assert!(mean_centroid(&[]).is_none());
    }

    #[test]
    fn offset_round_trips_through_haversine() {
        let (lat, lng) = offset_by_bearing(19.0, 72.8, 750.0, std::f64::consts::FRAC_PI_2);
        let dist = haversine_distance(19.0, 72.8, lat, lng);
        assert!((dist - 750.0).abs() < 1.0, "expected ~750m, got {dist}");
    }
}
