//! Fixtures and fake collaborators shared by the unit tests.

use crate::error::{FetchError, StorageError};
use crate::store::{CacheStore, MemoryStore};
use crate::types::forecast::{ForecastCacheEntry, ForecastType};
use crate::types::gridpoint::{Gridpoint, GridpointId, GridpointKey, GridpointMetadata};
use crate::types::location::LatLon;
use crate::types::point_entry::{NewPointEntry, PointCacheEntry};
use crate::types::station::{GridpointStationLink, Station};
use crate::upstream::{
    ForecastClient, ForecastFetch, ForecastResponse, Freshness, PointsClient, PointsResponse,
    StationPayload, StationsClient,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A fixed instant plus `secs` seconds.
pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + TimeDelta::seconds(secs)
}

pub(crate) fn metadata(grid_id: &str, grid_x: i32, grid_y: i32) -> GridpointMetadata {
    let base = format!("https://api.weather.gov/gridpoints/{grid_id}/{grid_x},{grid_y}");
    GridpointMetadata {
        key: GridpointKey::new(grid_id, grid_x, grid_y),
        forecast_url: Some(format!("{base}/forecast")),
        hourly_url: Some(format!("{base}/forecast/hourly")),
        griddata_url: Some(base.clone()),
        stations_url: Some(format!("{base}/stations")),
        time_zone: Some("America/New_York".to_string()),
        radar_station: Some("KCCX".to_string()),
        raw: json!({"properties": {"gridId": grid_id, "gridX": grid_x, "gridY": grid_y}}),
    }
}

pub(crate) fn station_payload(code: &str) -> StationPayload {
    StationPayload {
        code: code.to_string(),
        name: Some(format!("Station {code}")),
        location: Some(LatLon(40.19, -76.76)),
        elevation_m: Some(94.0),
        time_zone: Some("America/New_York".to_string()),
        raw: json!({"properties": {"stationIdentifier": code}}),
    }
}

pub(crate) fn forecast_entry(
    gridpoint: GridpointId,
    forecast_type: ForecastType,
    fetched_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> ForecastCacheEntry {
    ForecastCacheEntry {
        gridpoint: Some(gridpoint),
        forecast_type,
        url: format!("https://api.weather.gov/gridpoints/CTP/72,85/{forecast_type}"),
        payload: json!({"properties": {"periods": [{"number": 1}]}}),
        status_code: Some(200),
        error: None,
        etag: Some("\"v1\"".to_string()),
        last_modified: Some(fetched_at),
        fetched_at,
        expires_at,
    }
}

fn pause(delay: &Mutex<Duration>) -> Duration {
    *delay.lock().unwrap()
}

/// Points endpoint fake. Every coordinate resolves to `CTP/72,85` unless a
/// different mapping is installed; the reference point is the query itself.
pub(crate) struct FakePointsClient {
    calls: AtomicUsize,
    delay: Mutex<Duration>,
    failure: Mutex<Option<FetchError>>,
    freshness: Mutex<Freshness>,
    cell: Box<dyn Fn(LatLon) -> GridpointMetadata + Send + Sync>,
}

impl FakePointsClient {
    pub(crate) fn new() -> Self {
        Self::with_cells(|_| metadata("CTP", 72, 85))
    }

    pub(crate) fn with_cells(
        cell: impl Fn(LatLon) -> GridpointMetadata + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            failure: Mutex::new(None),
            freshness: Mutex::new(Freshness::default()),
            cell: Box::new(cell),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn fail_with(&self, error: Option<FetchError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub(crate) fn set_freshness(&self, freshness: Freshness) {
        *self.freshness.lock().unwrap() = freshness;
    }
}

#[async_trait]
impl PointsClient for FakePointsClient {
    async fn resolve(&self, location: LatLon) -> Result<PointsResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = pause(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failure.lock().unwrap().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        Ok(PointsResponse {
            metadata: (self.cell)(location),
            reference_point: Some(location),
            etag: Some("\"points-v1\"".to_string()),
            last_modified: None,
            freshness: *self.freshness.lock().unwrap(),
        })
    }
}

pub(crate) struct FakeStationsClient {
    calls: AtomicUsize,
    stations: Mutex<Vec<StationPayload>>,
    failure: Mutex<Option<FetchError>>,
}

impl FakeStationsClient {
    pub(crate) fn new(codes: &[&str]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            stations: Mutex::new(codes.iter().map(|code| station_payload(code)).collect()),
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_with(&self, error: Option<FetchError>) {
        *self.failure.lock().unwrap() = error;
    }
}

#[async_trait]
impl StationsClient for FakeStationsClient {
    async fn list(&self, _stations_url: &str) -> Result<Vec<StationPayload>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.stations.lock().unwrap().clone())
    }
}

/// Validators seen by one forecast request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SeenRequest {
    pub url: String,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Forecast endpoint fake. Replies are taken from a script; once the script
/// is exhausted every request gets a fresh 200 body.
pub(crate) struct FakeForecastClient {
    delay: Mutex<Duration>,
    script: Mutex<VecDeque<Result<ForecastFetch, FetchError>>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl FakeForecastClient {
    pub(crate) fn new() -> Self {
        Self {
            delay: Mutex::new(Duration::ZERO),
            script: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, reply: Result<ForecastFetch, FetchError>) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub(crate) fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

pub(crate) fn fetched(body: serde_json::Value, etag: &str) -> ForecastFetch {
    ForecastFetch::Fetched(ForecastResponse {
        status_code: 200,
        body,
        etag: Some(etag.to_string()),
        last_modified: Some(ts(0)),
        freshness: Freshness::default(),
    })
}

#[async_trait]
impl ForecastClient for FakeForecastClient {
    async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<DateTime<Utc>>,
    ) -> Result<ForecastFetch, FetchError> {
        self.seen.lock().unwrap().push(SeenRequest {
            url: url.to_string(),
            etag: etag.map(str::to_string),
            last_modified,
        });
        let delay = pause(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(fetched(json!({"url": url}), "\"fresh\"")))
    }
}

/// A [`MemoryStore`] whose reads or writes can be switched to fail.
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> Result<&MemoryStore, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(StorageError::Backend("injected read failure".to_string()))
        } else {
            Ok(&self.inner)
        }
    }

    fn write(&self) -> Result<&MemoryStore, StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::Backend("injected write failure".to_string()))
        } else {
            Ok(&self.inner)
        }
    }
}

impl CacheStore for FlakyStore {
    fn gridpoint(&self, id: GridpointId) -> Result<Option<Gridpoint>, StorageError> {
        self.read()?.gridpoint(id)
    }

    fn gridpoint_by_key(
        &self,
        key: &GridpointKey,
    ) -> Result<Option<(GridpointId, Gridpoint)>, StorageError> {
        self.read()?.gridpoint_by_key(key)
    }

    fn upsert_gridpoint(
        &self,
        metadata: GridpointMetadata,
        now: DateTime<Utc>,
    ) -> Result<GridpointId, StorageError> {
        self.write()?.upsert_gridpoint(metadata, now)
    }

    fn delete_gridpoint(&self, id: GridpointId) -> Result<bool, StorageError> {
        self.write()?.delete_gridpoint(id)
    }

    fn insert_point(&self, entry: NewPointEntry) -> Result<PointCacheEntry, StorageError> {
        self.write()?.insert_point(entry)
    }

    fn nearest_live_point(
        &self,
        location: LatLon,
        radius_m: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<(PointCacheEntry, f64)>, StorageError> {
        self.read()?.nearest_live_point(location, radius_m, now)
    }

    fn points_for_gridpoint(&self, id: GridpointId) -> Result<Vec<PointCacheEntry>, StorageError> {
        self.read()?.points_for_gridpoint(id)
    }

    fn purge_points(&self, now: DateTime<Utc>, retention: TimeDelta) -> Result<usize, StorageError> {
        self.write()?.purge_points(now, retention)
    }

    fn refresh_stations(
        &self,
        gridpoint: GridpointId,
        stations: &[StationPayload],
        links: Vec<GridpointStationLink>,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.write()?.refresh_stations(gridpoint, stations, links, now)
    }

    fn station(&self, code: &str) -> Result<Option<Station>, StorageError> {
        self.read()?.station(code)
    }

    fn ranked_stations(
        &self,
        gridpoint: GridpointId,
    ) -> Result<Vec<(GridpointStationLink, Station)>, StorageError> {
        self.read()?.ranked_stations(gridpoint)
    }

    fn touch_station(&self, code: &str, now: DateTime<Utc>) -> Result<bool, StorageError> {
        self.write()?.touch_station(code, now)
    }

    fn forecast(
        &self,
        gridpoint: GridpointId,
        forecast_type: ForecastType,
    ) -> Result<Option<ForecastCacheEntry>, StorageError> {
        self.read()?.forecast(gridpoint, forecast_type)
    }

    fn upsert_forecast(&self, entry: ForecastCacheEntry) -> Result<(), StorageError> {
        self.write()?.upsert_forecast(entry)
    }
}
