//! Forecast product types and the cached forecast row.

use crate::error::ValidationError;
use crate::types::gridpoint::GridpointId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The forecast products the upstream API publishes for every gridpoint.
///
/// This is a closed set; anything else is rejected by [`ForecastType::from_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ForecastType {
    /// Twelve-hour period forecast.
    Forecast,
    /// Hour-by-hour forecast.
    Hourly,
    /// Raw numerical grid data.
    Griddata,
}

impl ForecastType {
    pub const ALL: [ForecastType; 3] = [
        ForecastType::Forecast,
        ForecastType::Hourly,
        ForecastType::Griddata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastType::Forecast => "forecast",
            ForecastType::Hourly => "hourly",
            ForecastType::Griddata => "griddata",
        }
    }
}

/// Allows formatting a `ForecastType` using its storage name.
///
/// # Examples
///
/// ```
/// use gridpoint_cache::ForecastType;
///
/// assert_eq!(ForecastType::Hourly.to_string(), "hourly");
/// ```
impl fmt::Display for ForecastType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parses the boundary representation of a forecast type.
///
/// # Examples
///
/// ```
/// use gridpoint_cache::ForecastType;
///
/// assert_eq!("griddata".parse::<ForecastType>().unwrap(), ForecastType::Griddata);
/// assert!("weekly".parse::<ForecastType>().is_err());
/// ```
impl FromStr for ForecastType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forecast" => Ok(ForecastType::Forecast),
            "hourly" => Ok(ForecastType::Hourly),
            "griddata" => Ok(ForecastType::Griddata),
            _ => Err(ValidationError::UnknownForecastType(s.to_string())),
        }
    }
}

/// The single live cache row for a `(gridpoint, forecast_type)` pair.
///
/// Rows are upserted in place on every refresh attempt; there is no history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastCacheEntry {
    /// `None` for a payload fetched directly for a gridpoint that could not be
    /// stored. Such entries are never written to the cache.
    pub gridpoint: Option<GridpointId>,
    pub forecast_type: ForecastType,
    /// URL the payload was fetched from.
    pub url: String,
    #[serde(with = "crate::store::json_text")]
    pub payload: serde_json::Value,
    /// Status of the most recent fetch attempt, `None` if it never reached HTTP.
    pub status_code: Option<u16>,
    /// Error of the most recent fetch attempt. Set only while serving stale data.
    pub error: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    /// Time of the last successful fetch or revalidation.
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ForecastCacheEntry {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// True when the last refresh failed and this payload predates the failure.
    pub fn is_stale(&self) -> bool {
        self.error.is_some()
    }
}
