//! Saving and restoring a [`MemoryStore`] to disk with `bincode`.

use crate::error::StorageError;
use crate::store::memory::{MemoryStore, PointIndexEntry, Tables};
use crate::types::forecast::ForecastCacheEntry;
use crate::types::gridpoint::{Gridpoint, GridpointId};
use crate::types::point_entry::PointCacheEntry;
use crate::types::station::{GridpointStationLink, Station};
use crate::utils::ensure_cache_dir_exists;
use bincode::config::{Configuration, Fixint, LittleEndian};
use log::info;
use rstar::RTree;
use serde::{Deserialize, Serialize};
use std::path::Path;

const BINCODE_CONFIG: Configuration<LittleEndian, Fixint> =
    bincode::config::standard().with_fixed_int_encoding();
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    next_gridpoint_id: u64,
    next_point_id: u64,
    gridpoints: Vec<(GridpointId, Gridpoint)>,
    points: Vec<PointCacheEntry>,
    stations: Vec<Station>,
    links: Vec<GridpointStationLink>,
    forecasts: Vec<ForecastCacheEntry>,
}

impl Snapshot {
    fn capture(tables: &Tables) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            next_gridpoint_id: tables.next_gridpoint_id,
            next_point_id: tables.next_point_id,
            gridpoints: tables
                .gridpoints
                .iter()
                .map(|(id, gp)| (*id, gp.clone()))
                .collect(),
            points: tables.points.values().cloned().collect(),
            stations: tables.stations.values().cloned().collect(),
            links: tables.station_links.values().flatten().cloned().collect(),
            forecasts: tables.forecasts.values().cloned().collect(),
        }
    }

    fn into_tables(self) -> Tables {
        let mut tables = Tables {
            next_gridpoint_id: self.next_gridpoint_id,
            next_point_id: self.next_point_id,
            ..Tables::default()
        };
        for (id, gridpoint) in self.gridpoints {
            tables.gridpoint_keys.insert(gridpoint.key().clone(), id);
            tables.gridpoints.insert(id, gridpoint);
        }
        tables.point_index = RTree::bulk_load(
            self.points
                .iter()
                .map(PointIndexEntry::for_entry)
                .collect(),
        );
        tables.points = self.points.into_iter().map(|p| (p.id, p)).collect();
        tables.stations = self
            .stations
            .into_iter()
            .map(|s| (s.code.clone(), s))
            .collect();
        for link in self.links {
            tables
                .station_links
                .entry(link.gridpoint)
                .or_default()
                .push(link);
        }
        tables.forecasts = self
            .forecasts
            .into_iter()
            .filter_map(|f| Some(((f.gridpoint?, f.forecast_type), f)))
            .collect();
        tables
    }
}

impl MemoryStore {
    /// Writes every table to `path`, replacing any previous snapshot.
    ///
    /// The tables are copied under the read lock and encoded afterwards, so
    /// concurrent readers and writers are only blocked for the copy.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::SnapshotEncode`] or [`StorageError::SnapshotWrite`]
    /// when encoding or writing fails.
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), StorageError> {
        let snapshot = Snapshot::capture(&*self.read()?);
        let start = std::time::Instant::now();

        let bytes = tokio::task::spawn_blocking(move || {
            bincode::serde::encode_to_vec(&snapshot, BINCODE_CONFIG)
                .map_err(|e| StorageError::SnapshotEncode(e.to_string()))
        })
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))??;

        if let Some(parent) = path.parent() {
            ensure_cache_dir_exists(parent)
                .await
                .map_err(|e| StorageError::SnapshotWrite {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
        }
        tokio::fs::write(path, &bytes)
            .await
            .map_err(|e| StorageError::SnapshotWrite {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        info!(
            "Wrote store snapshot ({} bytes) to {} in {:?}",
            bytes.len(),
            path.display(),
            start.elapsed()
        );
        Ok(())
    }

    /// Loads a store previously written by [`MemoryStore::save_snapshot`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::SnapshotRead`] if the file cannot be read and
    /// [`StorageError::SnapshotDecode`] if it is corrupt or from an
    /// incompatible version.
    pub async fn load_snapshot(path: &Path) -> Result<Self, StorageError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::SnapshotRead {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let path_buf = path.to_path_buf();
        let snapshot = tokio::task::spawn_blocking(move || {
            bincode::serde::decode_from_slice::<Snapshot, _>(&bytes, BINCODE_CONFIG)
                .map(|(snapshot, _)| snapshot)
                .map_err(|e| StorageError::SnapshotDecode {
                    path: path_buf,
                    message: e.to_string(),
                })
        })
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))??;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StorageError::SnapshotDecode {
                path: path.to_path_buf(),
                message: format!(
                    "unsupported snapshot version {} (expected {})",
                    snapshot.version, SNAPSHOT_VERSION
                ),
            });
        }

        info!(
            "Loaded store snapshot from {} ({} gridpoints, {} point entries)",
            path.display(),
            snapshot.gridpoints.len(),
            snapshot.points.len()
        );
        Ok(MemoryStore::from_tables(snapshot.into_tables()))
    }
}
