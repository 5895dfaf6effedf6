//! Cache policy knobs.

use crate::error::ValidationError;
use crate::types::location::{BoundingBox, LatLon};
use bon::Builder;
use chrono::TimeDelta;
use std::time::Duration;

pub const DEFAULT_REUSE_RADIUS_M: f64 = 5000.0;
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_ERROR_BACKOFF_SECS: i64 = 60;

/// Policy for the whole cache. Every field has a default, so
/// `CacheConfig::default()` is a sensible starting point.
///
/// # Examples
///
/// ```
/// use chrono::TimeDelta;
/// use gridpoint_cache::{BoundingBox, CacheConfig};
///
/// let config = CacheConfig::builder()
///     .reuse_radius_m(2500.0)
///     .forecast_ttl(TimeDelta::minutes(5))
///     .bounds(BoundingBox::new(39.7199, 42.5167, -80.5243, -74.707))
///     .build();
/// assert_eq!(config.reuse_radius_m, 2500.0);
/// assert_eq!(config.point_ttl, TimeDelta::hours(24));
/// ```
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct CacheConfig {
    /// How far (meters) a cached resolution may be reused for a new coordinate.
    #[builder(default = DEFAULT_REUSE_RADIUS_M)]
    pub reuse_radius_m: f64,

    /// How long a coordinate resolution is trusted.
    #[builder(default = TimeDelta::hours(24))]
    pub point_ttl: TimeDelta,

    /// How long a forecast payload is served without revalidation.
    #[builder(default = TimeDelta::minutes(10))]
    pub forecast_ttl: TimeDelta,

    /// How long a stale forecast is served after a failed refresh before the
    /// next attempt.
    #[builder(default = TimeDelta::seconds(DEFAULT_ERROR_BACKOFF_SECS))]
    pub error_backoff: TimeDelta,

    /// Upper bound for any single upstream call.
    #[builder(default = DEFAULT_UPSTREAM_TIMEOUT)]
    pub upstream_timeout: Duration,

    /// How long an expired point entry that was never superseded is kept.
    #[builder(default = TimeDelta::days(7))]
    pub point_retention: TimeDelta,

    /// Optional service area. Coordinates outside it are rejected.
    pub bounds: Option<BoundingBox>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CacheConfig {
    pub fn resolve_policy(&self) -> ResolvePolicy {
        ResolvePolicy {
            reuse_radius_m: self.reuse_radius_m,
            point_ttl: self.point_ttl,
        }
    }

    /// Range check plus the optional service-area check.
    pub fn check_location(&self, location: LatLon) -> Result<(), ValidationError> {
        match &self.bounds {
            Some(bounds) => bounds.check(location),
            None => location.validate(),
        }
    }
}

/// Per-request resolution policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvePolicy {
    pub reuse_radius_m: f64,
    pub point_ttl: TimeDelta,
}

impl ResolvePolicy {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_radius(self.reuse_radius_m)?;
        check_ttl(self.point_ttl)
    }
}

pub(crate) fn check_radius(radius_m: f64) -> Result<(), ValidationError> {
    if radius_m.is_finite() && radius_m > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidRadius(radius_m))
    }
}

pub(crate) fn check_ttl(ttl: TimeDelta) -> Result<(), ValidationError> {
    if ttl < TimeDelta::zero() {
        Err(ValidationError::NegativeTtl(ttl))
    } else {
        Ok(())
    }
}
