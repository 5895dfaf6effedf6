//! Persistence for gridpoints, point-cache rows, stations and forecasts.
//!
//! [`CacheStore`] is the contract the engine needs from storage: every
//! mutation is an upsert or replace scoped to a single key and must be
//! atomic, and readers must never observe half-applied writes.
//! [`MemoryStore`] is the bundled implementation.

pub mod json_text;
pub mod memory;
pub mod snapshot;

use crate::error::StorageError;
use crate::types::forecast::{ForecastCacheEntry, ForecastType};
use crate::types::gridpoint::{Gridpoint, GridpointId, GridpointKey, GridpointMetadata};
use crate::types::location::LatLon;
use crate::types::point_entry::{NewPointEntry, PointCacheEntry};
use crate::types::station::{GridpointStationLink, Station};
use crate::upstream::StationPayload;
use chrono::{DateTime, TimeDelta, Utc};

pub use memory::MemoryStore;

pub trait CacheStore: Send + Sync {
    fn gridpoint(&self, id: GridpointId) -> Result<Option<Gridpoint>, StorageError>;

    fn gridpoint_by_key(
        &self,
        key: &GridpointKey,
    ) -> Result<Option<(GridpointId, Gridpoint)>, StorageError>;

    /// Inserts or updates by natural key. An existing row keeps its id and
    /// `created_at`; everything else is overwritten.
    fn upsert_gridpoint(
        &self,
        metadata: GridpointMetadata,
        now: DateTime<Utc>,
    ) -> Result<GridpointId, StorageError>;

    /// Deletes a gridpoint together with its point entries, forecast rows and
    /// station links. Returns `false` if it did not exist.
    fn delete_gridpoint(&self, id: GridpointId) -> Result<bool, StorageError>;

    /// Appends a point-cache row. Never touches existing rows.
    fn insert_point(&self, entry: NewPointEntry) -> Result<PointCacheEntry, StorageError>;

    /// Nearest live (`expires_at > now`) entry within `radius_m` of `location`,
    /// with its great-circle distance in meters. Equal distances are broken
    /// in favour of the most recently fetched entry.
    fn nearest_live_point(
        &self,
        location: LatLon,
        radius_m: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<(PointCacheEntry, f64)>, StorageError>;

    fn points_for_gridpoint(&self, id: GridpointId) -> Result<Vec<PointCacheEntry>, StorageError>;

    /// Removes expired entries that are either superseded by a later entry
    /// for the same gridpoint or expired for at least `retention`.
    fn purge_points(&self, now: DateTime<Utc>, retention: TimeDelta)
        -> Result<usize, StorageError>;

    /// Upserts `stations` and swaps the gridpoint's link set for `links` in
    /// one atomic step.
    fn refresh_stations(
        &self,
        gridpoint: GridpointId,
        stations: &[StationPayload],
        links: Vec<GridpointStationLink>,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    fn station(&self, code: &str) -> Result<Option<Station>, StorageError>;

    /// Linked stations ordered by rank.
    fn ranked_stations(
        &self,
        gridpoint: GridpointId,
    ) -> Result<Vec<(GridpointStationLink, Station)>, StorageError>;

    /// Advances `last_seen`. Returns `false` for unknown stations.
    fn touch_station(&self, code: &str, now: DateTime<Utc>) -> Result<bool, StorageError>;

    fn forecast(
        &self,
        gridpoint: GridpointId,
        forecast_type: ForecastType,
    ) -> Result<Option<ForecastCacheEntry>, StorageError>;

    /// Replaces the row for `(entry.gridpoint, entry.forecast_type)`.
    fn upsert_forecast(&self, entry: ForecastCacheEntry) -> Result<(), StorageError>;
}
