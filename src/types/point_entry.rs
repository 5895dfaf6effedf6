//! Rows of the point cache: one per upstream coordinate resolution.

use crate::types::gridpoint::GridpointId;
use crate::types::location::LatLon;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PointEntryId(pub u64);

/// A resolved `coordinate -> gridpoint` mapping. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCacheEntry {
    pub id: PointEntryId,
    /// The query coordinate that was resolved.
    pub location: LatLon,
    pub gridpoint: GridpointId,
    /// Distance from the query point to the gridpoint's reference point, if known.
    pub distance_m: Option<f64>,
    #[serde(with = "crate::store::json_text")]
    pub raw: serde_json::Value,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PointCacheEntry {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Input for a point cache insert; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPointEntry {
    pub location: LatLon,
    pub gridpoint: GridpointId,
    pub distance_m: Option<f64>,
    pub raw: serde_json::Value,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
