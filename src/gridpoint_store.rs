//! Keyed storage of resolved gridpoints.

use crate::error::GridCacheError;
use crate::store::CacheStore;
use crate::types::gridpoint::{Gridpoint, GridpointId, GridpointKey, GridpointMetadata};
use chrono::{DateTime, Utc};
use log::info;
use std::sync::Arc;

#[derive(Clone)]
pub struct GridpointStore {
    store: Arc<dyn CacheStore>,
}

impl GridpointStore {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Inserts a new gridpoint or refreshes the metadata of an existing one.
    /// The id, key and `created_at` of an existing gridpoint never change.
    pub fn upsert(
        &self,
        metadata: GridpointMetadata,
        now: DateTime<Utc>,
    ) -> Result<GridpointId, GridCacheError> {
        Ok(self.store.upsert_gridpoint(metadata, now)?)
    }

    pub fn get(&self, id: GridpointId) -> Result<Option<Gridpoint>, GridCacheError> {
        Ok(self.store.gridpoint(id)?)
    }

    pub fn find(
        &self,
        key: &GridpointKey,
    ) -> Result<Option<(GridpointId, Gridpoint)>, GridCacheError> {
        Ok(self.store.gridpoint_by_key(key)?)
    }

    /// Removes a gridpoint and everything hanging off it: point-cache
    /// entries, forecast rows and station links. Stations are shared between
    /// gridpoints and stay.
    pub fn evict(&self, id: GridpointId) -> Result<bool, GridCacheError> {
        let removed = self.store.delete_gridpoint(id)?;
        if removed {
            info!("Evicted gridpoint {} and its cached rows", id);
        }
        Ok(removed)
    }
}
