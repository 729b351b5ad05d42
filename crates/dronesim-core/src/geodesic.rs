//! Spherical-earth geodesic math.
//!
//! Distances, bearings and destination points on a sphere of radius
//! [`EARTH_RADIUS_M`]. Everything here is pure and safe to call from any thread.

use std::f64::consts::PI;

/// Mean earth radius used by every calculation in this crate.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Calculate distance between two points in meters using Haversine formula.
///
/// # Arguments
/// * `lat1`, `lon1` - First point coordinates in decimal degrees
/// * `lat2`, `lon2` - Second point coordinates in decimal degrees
///
/// # Returns
/// Great-circle distance in meters (0 for coincident points)
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Initial bearing from point 1 to point 2 in degrees, 0 = north, 90 = east.
///
/// Always within `[0, 360)`. Coincident points yield 0.
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    if lat1 == lat2 && lon1 == lon2 {
        return 0.0;
    }

    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let x = delta_lambda.sin() * phi2.cos();
    let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    normalize_heading(x.atan2(y).to_degrees())
}

/// Point reached by travelling `distance_m` from a start along `bearing_deg`.
///
/// # Arguments
/// * `lat`, `lon` - Starting position in degrees
/// * `bearing_deg` - Bearing in degrees (0 = north, 90 = east)
/// * `distance_m` - Distance in meters
///
/// # Returns
/// (new_lat, new_lon) in degrees
pub fn destination(lat: f64, lon: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    if distance_m.abs() <= f64::EPSILON {
        return (lat, lon);
    }

    let lat1 = lat.to_radians();
    let lon1 = lon.to_radians();
    let bearing_rad = bearing_deg.to_radians();
    let angular_distance = distance_m / EARTH_RADIUS_M;

    let sin_lat1 = lat1.sin();
    let cos_lat1 = lat1.cos();
    let sin_ad = angular_distance.sin();
    let cos_ad = angular_distance.cos();

    let sin_lat2 = sin_lat1 * cos_ad + cos_lat1 * sin_ad * bearing_rad.cos();
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();

    let y = bearing_rad.sin() * sin_ad * cos_lat1;
    let x = cos_ad - sin_lat1 * sin_lat2;
    let lon2 = (lon1 + y.atan2(x) + PI).rem_euclid(2.0 * PI) - PI;

    (lat2.to_degrees(), lon2.to_degrees())
}

/// Convert a north/south offset in meters to degrees latitude.
pub fn meters_to_lat_deg(meters: f64) -> f64 {
    meters / EARTH_RADIUS_M * 180.0 / PI
}

/// Convert an east/west offset in meters to degrees longitude.
/// Requires the reference latitude for the `cos(lat)` correction.
pub fn meters_to_lon_deg(meters: f64, ref_lat_deg: f64) -> f64 {
    let scale = (EARTH_RADIUS_M * ref_lat_deg.to_radians().cos()).max(1e-9);
    meters / scale * 180.0 / PI
}

/// Wrap any angle in degrees into `[0, 360)`.
pub fn normalize_heading(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // ~111km between these points (1 degree latitude)
        let dist = distance(0.0, 0.0, 1.0, 0.0);
        assert!((dist - 111_194.9).abs() < 1.0);
    }

    #[test]
    fn coincident_points_have_zero_distance_and_bearing() {
        let dist = distance(41.7962, 123.4309, 41.7962, 123.4309);
        assert!(dist < 0.001);
        assert_eq!(bearing(41.7962, 123.4309, 41.7962, 123.4309), 0.0);
    }

    #[test]
    fn bearing_cardinal_directions() {
        assert!((bearing(0.0, 0.0, 1.0, 0.0) - 0.0).abs() < 1e-6);
        assert!((bearing(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 1e-6);
        assert!((bearing(1.0, 0.0, 0.0, 0.0) - 180.0).abs() < 1e-6);
        assert!((bearing(0.0, 1.0, 0.0, 0.0) - 270.0).abs() < 1e-6);
    }

    #[test]
    fn destination_round_trips_through_distance_and_bearing() {
        let (lat, lon) = destination(41.8, 123.4, 37.0, 1_250.0);
        let dist = distance(41.8, 123.4, lat, lon);
        let brg = bearing(41.8, 123.4, lat, lon);
        assert!((dist - 1_250.0).abs() < 0.01, "distance was {dist}");
        assert!((brg - 37.0).abs() < 0.01, "bearing was {brg}");
    }

    #[test]
    fn destination_wraps_longitude_across_antimeridian() {
        let (_, lon) = destination(0.0, 179.9999, 90.0, 1_000.0);
        assert!(lon < -179.0, "expected wrapped longitude, got {lon}");
    }

    #[test]
    fn degree_offsets_match_distance() {
        let dlat = meters_to_lat_deg(100.0);
        assert!((distance(41.8, 123.4, 41.8 + dlat, 123.4) - 100.0).abs() < 0.01);

        let dlon = meters_to_lon_deg(100.0, 41.8);
        assert!((distance(41.8, 123.4, 41.8, 123.4 + dlon) - 100.0).abs() < 0.05);
    }

    #[test]
    fn normalize_heading_wraps() {
        assert_eq!(normalize_heading(360.0), 0.0);
        assert!((normalize_heading(-90.0) - 270.0).abs() < 1e-9);
        assert!((normalize_heading(725.0) - 5.0).abs() < 1e-9);
    }
}
