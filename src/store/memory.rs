//! In-process arena store.
//!
//! Gridpoints live in a primary table keyed by [`GridpointId`]; every other
//! table refers to them by id. Point entries are additionally indexed in an
//! R-tree over `[lat, lon]` so radius queries only look at nearby rows.
//! One `RwLock` guards all tables: each trait method is one critical section,
//! which is what makes upserts and link-set replacement atomic. Sections are
//! short and synchronous, never held across an await or an upstream call;
//! per-key serialization of upstream work lives in [`crate::InFlight`].

use crate::error::StorageError;
use crate::geo::{distance_m, search_envelope};
use crate::store::CacheStore;
use crate::types::forecast::{ForecastCacheEntry, ForecastType};
use crate::types::gridpoint::{Gridpoint, GridpointId, GridpointKey, GridpointMetadata};
use crate::types::location::LatLon;
use crate::types::point_entry::{NewPointEntry, PointCacheEntry, PointEntryId};
use crate::types::station::{GridpointStationLink, Station};
use crate::upstream::StationPayload;
use chrono::{DateTime, TimeDelta, Utc};
use ordered_float::OrderedFloat;
use rstar::{RTree, RTreeObject, AABB};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lightweight R-tree node pointing back at a [`PointCacheEntry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PointIndexEntry {
    pub(crate) id: PointEntryId,
    pub(crate) position: [f64; 2],
}

impl PointIndexEntry {
    pub(crate) fn for_entry(entry: &PointCacheEntry) -> Self {
        Self {
            id: entry.id,
            position: [entry.location.0, entry.location.1],
        }
    }
}

impl RTreeObject for PointIndexEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) next_gridpoint_id: u64,
    pub(crate) next_point_id: u64,
    pub(crate) gridpoints: HashMap<GridpointId, Gridpoint>,
    pub(crate) gridpoint_keys: HashMap<GridpointKey, GridpointId>,
    pub(crate) points: HashMap<PointEntryId, PointCacheEntry>,
    pub(crate) point_index: RTree<PointIndexEntry>,
    pub(crate) stations: HashMap<String, Station>,
    pub(crate) station_links: HashMap<GridpointId, Vec<GridpointStationLink>>,
    pub(crate) forecasts: HashMap<(GridpointId, ForecastType), ForecastCacheEntry>,
}

impl Tables {
    fn remove_point(&mut self, id: PointEntryId) {
        if let Some(entry) = self.points.remove(&id) {
            self.point_index.remove(&PointIndexEntry::for_entry(&entry));
        }
    }

    fn require_gridpoint(&self, id: GridpointId) -> Result<(), StorageError> {
        if self.gridpoints.contains_key(&id) {
            Ok(())
        } else {
            Err(StorageError::UnknownGridpoint(id.0))
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_tables(tables: Tables) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StorageError> {
        self.tables
            .read()
            .map_err(|_| StorageError::LockPoisoned("memory store"))
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StorageError> {
        self.tables
            .write()
            .map_err(|_| StorageError::LockPoisoned("memory store"))
    }

    /// Number of point-cache rows, live or not.
    pub fn point_count(&self) -> Result<usize, StorageError> {
        Ok(self.read()?.points.len())
    }

    pub fn gridpoint_count(&self) -> Result<usize, StorageError> {
        Ok(self.read()?.gridpoints.len())
    }
}

impl CacheStore for MemoryStore {
    fn gridpoint(&self, id: GridpointId) -> Result<Option<Gridpoint>, StorageError> {
        Ok(self.read()?.gridpoints.get(&id).cloned())
    }

    fn gridpoint_by_key(
        &self,
        key: &GridpointKey,
    ) -> Result<Option<(GridpointId, Gridpoint)>, StorageError> {
        let tables = self.read()?;
        Ok(tables
            .gridpoint_keys
            .get(key)
            .and_then(|id| tables.gridpoints.get(id).map(|gp| (*id, gp.clone()))))
    }

    fn upsert_gridpoint(
        &self,
        metadata: GridpointMetadata,
        now: DateTime<Utc>,
    ) -> Result<GridpointId, StorageError> {
        let mut tables = self.write()?;
        if let Some(id) = tables.gridpoint_keys.get(&metadata.key).copied() {
            if let Some(existing) = tables.gridpoints.get_mut(&id) {
                existing.metadata = metadata;
                existing.updated_at = now;
                return Ok(id);
            }
        }

        tables.next_gridpoint_id += 1;
        let id = GridpointId(tables.next_gridpoint_id);
        tables.gridpoint_keys.insert(metadata.key.clone(), id);
        tables.gridpoints.insert(
            id,
            Gridpoint {
                metadata,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    fn delete_gridpoint(&self, id: GridpointId) -> Result<bool, StorageError> {
        let mut tables = self.write()?;
        let Some(gridpoint) = tables.gridpoints.remove(&id) else {
            return Ok(false);
        };
        tables.gridpoint_keys.remove(gridpoint.key());

        let orphaned: Vec<PointEntryId> = tables
            .points
            .values()
            .filter(|entry| entry.gridpoint == id)
            .map(|entry| entry.id)
            .collect();
        for point_id in orphaned {
            tables.remove_point(point_id);
        }
        tables.station_links.remove(&id);
        tables.forecasts.retain(|(gridpoint, _), _| *gridpoint != id);
        Ok(true)
    }

    fn insert_point(&self, entry: NewPointEntry) -> Result<PointCacheEntry, StorageError> {
        let mut tables = self.write()?;
        tables.require_gridpoint(entry.gridpoint)?;

        tables.next_point_id += 1;
        let stored = PointCacheEntry {
            id: PointEntryId(tables.next_point_id),
            location: entry.location,
            gridpoint: entry.gridpoint,
            distance_m: entry.distance_m,
            raw: entry.raw,
            etag: entry.etag,
            last_modified: entry.last_modified,
            fetched_at: entry.fetched_at,
            expires_at: entry.expires_at,
        };
        tables.point_index.insert(PointIndexEntry::for_entry(&stored));
        tables.points.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn nearest_live_point(
        &self,
        location: LatLon,
        radius_m: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<(PointCacheEntry, f64)>, StorageError> {
        let tables = self.read()?;
        let envelope = search_envelope(location, radius_m);

        let best = tables
            .point_index
            .locate_in_envelope_intersecting(&envelope)
            .filter_map(|node| tables.points.get(&node.id))
            .filter(|entry| entry.is_live(now))
            .filter_map(|entry| {
                let dist = distance_m(location, entry.location);
                (dist <= radius_m).then_some((entry, dist))
            })
            .min_by_key(|(entry, dist)| {
                (
                    OrderedFloat(*dist),
                    Reverse(entry.fetched_at),
                    Reverse(entry.id),
                )
            });

        Ok(best.map(|(entry, dist)| (entry.clone(), dist)))
    }

    fn points_for_gridpoint(&self, id: GridpointId) -> Result<Vec<PointCacheEntry>, StorageError> {
        let tables = self.read()?;
        let mut entries: Vec<PointCacheEntry> = tables
            .points
            .values()
            .filter(|entry| entry.gridpoint == id)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| (entry.fetched_at, entry.id));
        Ok(entries)
    }

    fn purge_points(
        &self,
        now: DateTime<Utc>,
        retention: TimeDelta,
    ) -> Result<usize, StorageError> {
        let mut tables = self.write()?;

        let mut latest: HashMap<GridpointId, DateTime<Utc>> = HashMap::new();
        for entry in tables.points.values() {
            latest
                .entry(entry.gridpoint)
                .and_modify(|ts| *ts = (*ts).max(entry.fetched_at))
                .or_insert(entry.fetched_at);
        }

        let doomed: Vec<PointEntryId> = tables
            .points
            .values()
            .filter(|entry| !entry.is_live(now))
            .filter(|entry| {
                let superseded = latest
                    .get(&entry.gridpoint)
                    .is_some_and(|ts| *ts > entry.fetched_at);
                superseded || entry.expires_at + retention <= now
            })
            .map(|entry| entry.id)
            .collect();

        for id in &doomed {
            tables.remove_point(*id);
        }
        Ok(doomed.len())
    }

    fn refresh_stations(
        &self,
        gridpoint: GridpointId,
        stations: &[StationPayload],
        links: Vec<GridpointStationLink>,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        tables.require_gridpoint(gridpoint)?;

        for payload in stations {
            tables
                .stations
                .entry(payload.code.clone())
                .and_modify(|station| {
                    station.name = payload.name.clone();
                    station.location = payload.location;
                    station.elevation_m = payload.elevation_m;
                    station.time_zone = payload.time_zone.clone();
                    station.raw = payload.raw.clone();
                    station.last_seen = now;
                })
                .or_insert_with(|| Station {
                    code: payload.code.clone(),
                    name: payload.name.clone(),
                    location: payload.location,
                    elevation_m: payload.elevation_m,
                    time_zone: payload.time_zone.clone(),
                    raw: payload.raw.clone(),
                    first_seen: now,
                    last_seen: now,
                });
        }

        tables.station_links.insert(gridpoint, links);
        Ok(())
    }

    fn station(&self, code: &str) -> Result<Option<Station>, StorageError> {
        Ok(self.read()?.stations.get(code).cloned())
    }

    fn ranked_stations(
        &self,
        gridpoint: GridpointId,
    ) -> Result<Vec<(GridpointStationLink, Station)>, StorageError> {
        let tables = self.read()?;
        let Some(links) = tables.station_links.get(&gridpoint) else {
            return Ok(Vec::new());
        };
        let mut ranked: Vec<(GridpointStationLink, Station)> = links
            .iter()
            .filter_map(|link| {
                tables
                    .stations
                    .get(&link.station_code)
                    .map(|station| (link.clone(), station.clone()))
            })
            .collect();
        ranked.sort_by_key(|(link, _)| link.rank);
        Ok(ranked)
    }

    fn touch_station(&self, code: &str, now: DateTime<Utc>) -> Result<bool, StorageError> {
        let mut tables = self.write()?;
        match tables.stations.get_mut(code) {
            Some(station) => {
                station.last_seen = station.last_seen.max(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn forecast(
        &self,
        gridpoint: GridpointId,
        forecast_type: ForecastType,
    ) -> Result<Option<ForecastCacheEntry>, StorageError> {
        Ok(self
            .read()?
            .forecasts
            .get(&(gridpoint, forecast_type))
            .cloned())
    }

    fn upsert_forecast(&self, entry: ForecastCacheEntry) -> Result<(), StorageError> {
        let Some(gridpoint) = entry.gridpoint else {
            return Err(StorageError::UnkeyedForecast(entry.url));
        };
        let mut tables = self.write()?;
        tables.require_gridpoint(gridpoint)?;
        tables
            .forecasts
            .insert((gridpoint, entry.forecast_type), entry);
        Ok(())
    }
}
