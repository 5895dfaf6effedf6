//! Gridpoints: the upstream forecast-office grid cells every forecast is keyed by.

use crate::types::forecast::ForecastType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Surrogate id assigned by the store. Other rows refer to gridpoints by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridpointId(pub u64);

impl fmt::Display for GridpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Natural key of a gridpoint: office code plus cell coordinates, e.g. `CTP/72,85`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridpointKey {
    pub grid_id: String,
    pub grid_x: i32,
    pub grid_y: i32,
}

impl GridpointKey {
    pub fn new(grid_id: impl Into<String>, grid_x: i32, grid_y: i32) -> Self {
        Self {
            grid_id: grid_id.into(),
            grid_x,
            grid_y,
        }
    }
}

impl fmt::Display for GridpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{},{}", self.grid_id, self.grid_x, self.grid_y)
    }
}

/// Everything the upstream "points" endpoint tells us about a gridpoint.
///
/// This is the mutable part of a gridpoint; re-resolution overwrites it but
/// never changes the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridpointMetadata {
    pub key: GridpointKey,
    pub forecast_url: Option<String>,
    pub hourly_url: Option<String>,
    pub griddata_url: Option<String>,
    pub stations_url: Option<String>,
    /// IANA time zone name, e.g. "America/New_York".
    pub time_zone: Option<String>,
    /// Radar station code, e.g. "KCCX".
    pub radar_station: Option<String>,
    /// Raw upstream payload, kept for debugging.
    #[serde(with = "crate::store::json_text")]
    pub raw: serde_json::Value,
}

/// A stored gridpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gridpoint {
    pub metadata: GridpointMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Gridpoint {
    pub fn key(&self) -> &GridpointKey {
        &self.metadata.key
    }

    /// The upstream URL serving `forecast_type` for this gridpoint, if known.
    pub fn url_for(&self, forecast_type: ForecastType) -> Option<&str> {
        let url = match forecast_type {
            ForecastType::Forecast => &self.metadata.forecast_url,
            ForecastType::Hourly => &self.metadata.hourly_url,
            ForecastType::Griddata => &self.metadata.griddata_url,
        };
        url.as_deref()
    }
}
