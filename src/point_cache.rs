//! Spatial cache of coordinate resolutions.
//!
//! Answers "is there already a gridpoint usable for this coordinate?" without
//! calling upstream. Entries are append-only: a re-resolution adds a new row
//! instead of touching old ones, and stale rows are only removed by
//! [`PointCache::purge`].

use crate::config::{check_radius, check_ttl};
use crate::error::GridCacheError;
use crate::store::CacheStore;
use crate::types::gridpoint::GridpointId;
use crate::types::location::LatLon;
use crate::types::point_entry::{NewPointEntry, PointCacheEntry};
use bon::bon;
use chrono::{DateTime, TimeDelta, Utc};
use log::debug;
use std::sync::Arc;

/// A point cache hit: the reusable entry and how far it is from the query.
#[derive(Debug, Clone, PartialEq)]
pub struct PointMatch {
    pub entry: PointCacheEntry,
    pub distance_m: f64,
}

#[derive(Clone)]
pub struct PointCache {
    store: Arc<dyn CacheStore>,
}

#[bon]
impl PointCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Finds the nearest live entry within `reuse_radius_m` of `location`.
    ///
    /// Expired entries are never returned, even when they are closer than
    /// every live one. Equal distances go to the most recently fetched entry.
    ///
    /// # Errors
    ///
    /// [`GridCacheError::Validation`] for an invalid coordinate or a
    /// non-positive radius, [`GridCacheError::Storage`] if the store fails.
    /// Callers treat a storage error as a miss.
    pub fn lookup(
        &self,
        location: LatLon,
        reuse_radius_m: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<PointMatch>, GridCacheError> {
        location.validate()?;
        check_radius(reuse_radius_m)?;

        let found = self
            .store
            .nearest_live_point(location, reuse_radius_m, now)?
            .map(|(entry, distance_m)| PointMatch { entry, distance_m });
        match &found {
            Some(hit) => debug!(
                "Point cache hit for ({}, {}): gridpoint {} at {:.1} m",
                location.0, location.1, hit.entry.gridpoint, hit.distance_m
            ),
            None => debug!(
                "Point cache miss for ({}, {}) within {} m",
                location.0, location.1, reuse_radius_m
            ),
        }
        Ok(found)
    }

    /// Appends a new entry expiring at `now + ttl`.
    ///
    /// # Errors
    ///
    /// [`GridCacheError::Validation`] for an invalid coordinate or negative
    /// TTL, [`GridCacheError::Storage`] if the row cannot be written.
    #[builder]
    pub fn insert(
        &self,
        location: LatLon,
        gridpoint: GridpointId,
        distance_m: Option<f64>,
        #[builder(default)] raw: serde_json::Value,
        etag: Option<String>,
        last_modified: Option<DateTime<Utc>>,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<PointCacheEntry, GridCacheError> {
        location.validate()?;
        check_ttl(ttl)?;

        let entry = self.store.insert_point(NewPointEntry {
            location,
            gridpoint,
            distance_m,
            raw,
            etag,
            last_modified,
            fetched_at: now,
            expires_at: now + ttl,
        })?;
        Ok(entry)
    }

    /// Every entry recorded for `gridpoint`, oldest first.
    pub fn entries_for(&self, gridpoint: GridpointId) -> Result<Vec<PointCacheEntry>, GridCacheError> {
        Ok(self.store.points_for_gridpoint(gridpoint)?)
    }

    /// Garbage-collects expired entries that were superseded by a later
    /// resolution of the same gridpoint, or that expired more than
    /// `retention` ago. Returns how many were removed.
    pub fn purge(&self, now: DateTime<Utc>, retention: TimeDelta) -> Result<usize, GridCacheError> {
        let removed = self.store.purge_points(now, retention)?;
        if removed > 0 {
            debug!("Purged {} expired point cache entries", removed);
        }
        Ok(removed)
    }
}
