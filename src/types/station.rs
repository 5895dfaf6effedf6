//! Observation stations and their ranked links to gridpoints.

use crate::types::gridpoint::GridpointId;
use crate::types::location::LatLon;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An observation station, identified by its station code (e.g. "KMDT").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub code: String,
    pub name: Option<String>,
    pub location: Option<LatLon>,
    /// Elevation above sea level in meters, if available.
    pub elevation_m: Option<f64>,
    pub time_zone: Option<String>,
    #[serde(with = "crate::store::json_text")]
    pub raw: serde_json::Value,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Ranked association between a gridpoint and one of its stations.
///
/// Rank 1 is the preferred station; ranks need not be contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridpointStationLink {
    pub gridpoint: GridpointId,
    pub station_code: String,
    pub rank: u32,
    pub is_primary: bool,
}
