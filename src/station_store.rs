//! Observation stations and the ranked station list of each gridpoint.

use crate::error::GridCacheError;
use crate::store::CacheStore;
use crate::types::gridpoint::GridpointId;
use crate::types::station::{GridpointStationLink, Station};
use crate::upstream::StationPayload;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct StationStore {
    store: Arc<dyn CacheStore>,
}

impl StationStore {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Records `ordered` (highest priority first) as the station list of
    /// `gridpoint`.
    ///
    /// Every station is upserted by code, then the gridpoint's links are
    /// replaced wholesale: rank is the 1-based position in `ordered` and only
    /// the first position is primary. Stations without a code are skipped, as
    /// are repeats of a code already seen (the first position wins), so ranks
    /// may have gaps but never collide. Readers see either the previous link
    /// set or the new one, never a mix.
    ///
    /// Returns the number of stations linked.
    pub fn refresh_stations(
        &self,
        gridpoint: GridpointId,
        ordered: &[StationPayload],
        now: DateTime<Utc>,
    ) -> Result<usize, GridCacheError> {
        let mut seen = HashSet::new();
        let mut stations = Vec::with_capacity(ordered.len());
        let mut links = Vec::with_capacity(ordered.len());

        for (index, payload) in ordered.iter().enumerate() {
            if payload.code.trim().is_empty() {
                warn!(
                    "Skipping station without identifier at position {} for gridpoint {}",
                    index, gridpoint
                );
                continue;
            }
            if !seen.insert(payload.code.as_str()) {
                continue;
            }
            stations.push(payload.clone());
            links.push(GridpointStationLink {
                gridpoint,
                station_code: payload.code.clone(),
                rank: index as u32 + 1,
                is_primary: index == 0,
            });
        }

        let linked = links.len();
        self.store
            .refresh_stations(gridpoint, &stations, links, now)?;
        debug!("Linked {} stations to gridpoint {}", linked, gridpoint);
        Ok(linked)
    }

    /// Stations linked to `gridpoint`, best first.
    pub fn ranked(
        &self,
        gridpoint: GridpointId,
    ) -> Result<Vec<(GridpointStationLink, Station)>, GridCacheError> {
        Ok(self.store.ranked_stations(gridpoint)?)
    }

    pub fn station(&self, code: &str) -> Result<Option<Station>, GridCacheError> {
        Ok(self.store.station(code)?)
    }

    /// Advances the station's `last_seen` after an observation was read from it.
    pub fn mark_observed(&self, code: &str, now: DateTime<Utc>) -> Result<bool, GridCacheError> {
        Ok(self.store.touch_station(code, now)?)
    }
}
