//! Geographic coordinates accepted by the cache and their validation rules.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// Represents a geographical coordinate using latitude and longitude.
///
/// Latitude is the first element (index 0), and longitude is the second (index 1).
/// Both values are represented as `f64` decimal degrees.
///
/// # Examples
///
/// ```
/// use gridpoint_cache::LatLon;
///
/// let harrisburg = LatLon(40.27, -76.88);
/// assert_eq!(harrisburg.0, 40.27); // Latitude
/// assert_eq!(harrisburg.1, -76.88); // Longitude
/// assert!(harrisburg.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon(pub f64, pub f64);

impl LatLon {
    pub fn lat(&self) -> f64 {
        self.0
    }

    pub fn lon(&self) -> f64 {
        self.1
    }

    /// Checks that the coordinate is a real point on the globe.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NotANumber`] for NaN components and the
    /// `*OutOfRange` variants when latitude is outside `[-90, 90]` or
    /// longitude is outside `[-180, 180]`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let LatLon(lat, lon) = *self;
        if lat.is_nan() || lon.is_nan() {
            return Err(ValidationError::NotANumber { lat, lon });
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(ValidationError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(ValidationError::LongitudeOutOfRange(lon));
        }
        Ok(())
    }
}

/// An inclusive latitude/longitude rectangle used to restrict which
/// coordinates a deployment is willing to serve.
///
/// # Examples
///
/// ```
/// use gridpoint_cache::{BoundingBox, LatLon};
///
/// let pennsylvania = BoundingBox::new(39.7199, 42.5167, -80.5243, -74.707);
/// assert!(pennsylvania.contains(LatLon(40.27, -76.88)));
/// assert!(!pennsylvania.contains(LatLon(38.9, -77.03)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    pub fn contains(&self, location: LatLon) -> bool {
        (self.min_lat..=self.max_lat).contains(&location.0)
            && (self.min_lon..=self.max_lon).contains(&location.1)
    }

    /// Validates `location` and then checks it against the box.
    ///
    /// # Errors
    ///
    /// Returns whatever [`LatLon::validate`] returns, or
    /// [`ValidationError::OutOfBounds`] when the point lies outside the box.
    pub fn check(&self, location: LatLon) -> Result<(), ValidationError> {
        location.validate()?;
        if self.contains(location) {
            Ok(())
        } else {
            Err(ValidationError::OutOfBounds {
                lat: location.0,
                lon: location.1,
            })
        }
    }
}
