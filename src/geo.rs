//! Great-circle helpers shared by the point cache and the in-flight registry.

use crate::types::location::LatLon;
use haversine::{distance, Location as HaversineLocation, Units};
use rstar::AABB;

/// Mean earth radius used by the `haversine` crate, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

// Padding applied to search envelopes so floating point error never
// excludes a point that is exactly on the radius.
const ENVELOPE_PADDING: f64 = 1.01;

/// Great-circle distance between two coordinates, in meters.
pub fn distance_m(a: LatLon, b: LatLon) -> f64 {
    distance(
        HaversineLocation {
            latitude: a.0,
            longitude: a.1,
        },
        HaversineLocation {
            latitude: b.0,
            longitude: b.1,
        },
        Units::Kilometers,
    ) * 1000.0
}

/// A `[lat, lon]` bounding box guaranteed to contain every point within
/// `radius_m` of `center`.
///
/// The box is widened to the full longitude range near the poles and when
/// the circle crosses the antimeridian, so callers can always filter the
/// candidates by exact distance afterwards.
pub fn search_envelope(center: LatLon, radius_m: f64) -> AABB<[f64; 2]> {
    let angular = radius_m / EARTH_RADIUS_M;
    let dlat = angular.to_degrees() * ENVELOPE_PADDING;

    let min_lat = (center.0 - dlat).max(-90.0);
    let max_lat = (center.0 + dlat).min(90.0);
    let full_lon = AABB::from_corners([min_lat, -180.0], [max_lat, 180.0]);

    if min_lat <= -90.0 || max_lat >= 90.0 || angular >= std::f64::consts::FRAC_PI_2 {
        return full_lon;
    }

    let widest_lat = min_lat.abs().max(max_lat.abs()).to_radians();
    let ratio = angular.sin() / widest_lat.cos();
    if ratio >= 1.0 {
        return full_lon;
    }
    let dlon = ratio.asin().to_degrees() * ENVELOPE_PADDING;
    let min_lon = center.1 - dlon;
    let max_lon = center.1 + dlon;
    if min_lon < -180.0 || max_lon > 180.0 {
        return full_lon;
    }

    AABB::from_corners([min_lat, min_lon], [max_lat, max_lon])
}
