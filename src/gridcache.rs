//! The main entry point: one struct wiring the store, the resolver and the
//! forecast cache together.

use crate::config::{CacheConfig, ResolvePolicy};
use crate::error::GridCacheError;
use crate::forecast::{ForecastBundle, ForecastCache, ForecastService};
use crate::gridpoint_store::GridpointStore;
use crate::point_cache::PointCache;
use crate::resolver::{GridpointResolver, Resolution};
use crate::station_store::StationStore;
use crate::store::{CacheStore, MemoryStore};
use crate::types::forecast::{ForecastCacheEntry, ForecastType};
use crate::types::gridpoint::GridpointId;
use crate::types::location::LatLon;
use crate::types::station::{GridpointStationLink, Station};
use crate::upstream::{ForecastClient, PointsClient, StationsClient};
use bon::bon;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

/// A gridpoint-aware cache in front of a forecast API.
///
/// Coordinates are resolved to gridpoints through the point cache (falling
/// back to the upstream points endpoint), and forecast products are served
/// from the forecast cache with conditional revalidation. The upstream API
/// is reached only through the client traits passed to the builder.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use chrono::{DateTime, Utc};
/// use gridpoint_cache::{
///     FetchError, ForecastClient, ForecastFetch, ForecastResponse, ForecastType, Freshness,
///     GridCache, GridCacheError, GridpointKey, GridpointMetadata, LatLon, PointsClient,
///     PointsResponse,
/// };
/// use serde_json::json;
/// use std::sync::Arc;
///
/// struct Upstream;
///
/// #[async_trait]
/// impl PointsClient for Upstream {
///     async fn resolve(&self, _location: LatLon) -> Result<PointsResponse, FetchError> {
///         Ok(PointsResponse {
///             metadata: GridpointMetadata {
///                 key: GridpointKey::new("CTP", 72, 85),
///                 forecast_url: Some("https://api.weather.gov/gridpoints/CTP/72,85/forecast".into()),
///                 hourly_url: None,
///                 griddata_url: None,
///                 stations_url: None,
///                 time_zone: Some("America/New_York".into()),
///                 radar_station: Some("KCCX".into()),
///                 raw: json!({}),
///             },
///             reference_point: None,
///             etag: None,
///             last_modified: None,
///             freshness: Freshness::default(),
///         })
///     }
/// }
///
/// #[async_trait]
/// impl ForecastClient for Upstream {
///     async fn fetch(
///         &self,
///         _url: &str,
///         _etag: Option<&str>,
///         _last_modified: Option<DateTime<Utc>>,
///     ) -> Result<ForecastFetch, FetchError> {
///         Ok(ForecastFetch::Fetched(ForecastResponse {
///             status_code: 200,
///             body: json!({"periods": []}),
///             etag: Some("\"abc\"".into()),
///             last_modified: None,
///             freshness: Freshness::from_headers(Some("public, max-age=300"), None),
///         }))
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), GridCacheError> {
/// let upstream = Arc::new(Upstream);
/// let cache = GridCache::builder()
///     .points_client(upstream.clone())
///     .forecast_client(upstream)
///     .build();
///
/// let forecast = cache
///     .forecast()
///     .location(LatLon(40.27, -76.88))
///     .forecast_type(ForecastType::Forecast)
///     .call()
///     .await?;
/// assert_eq!(forecast.payload["periods"], json!([]));
/// assert!(!forecast.is_stale());
/// assert_eq!((forecast.expires_at - forecast.fetched_at).num_seconds(), 300);
/// # Ok(())
/// # }
/// ```
pub struct GridCache {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    resolver: GridpointResolver,
    forecasts: ForecastService,
    points: PointCache,
    gridpoints: GridpointStore,
    stations: StationStore,
}

#[bon]
impl GridCache {
    /// Creates a cache.
    ///
    /// # Arguments
    ///
    /// * `.points_client(..)`: **Required.** Resolves coordinates to gridpoints.
    /// * `.forecast_client(..)`: **Required.** Fetches forecast products.
    /// * `.stations_client(..)`: Optional. When set, each upstream resolution
    ///   also refreshes the gridpoint's ranked station list.
    /// * `.store(..)`: Optional. Defaults to an empty [`MemoryStore`]. Pass a
    ///   store restored with [`MemoryStore::load_snapshot`] to start warm.
    /// * `.config(..)`: Optional. Defaults to [`CacheConfig::default`].
    #[builder]
    pub fn new(
        points_client: Arc<dyn PointsClient>,
        forecast_client: Arc<dyn ForecastClient>,
        stations_client: Option<Arc<dyn StationsClient>>,
        store: Option<Arc<dyn CacheStore>>,
        #[builder(default)] config: CacheConfig,
    ) -> Self {
        let store = store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let resolver = GridpointResolver::builder()
            .store(Arc::clone(&store))
            .points_client(points_client)
            .maybe_stations_client(stations_client)
            .config(config.clone())
            .build();
        let forecast_cache = ForecastCache::builder()
            .store(Arc::clone(&store))
            .client(forecast_client)
            .timeout(config.upstream_timeout)
            .error_backoff(config.error_backoff)
            .build();

        Self {
            forecasts: ForecastService::new(resolver.clone(), forecast_cache, config.forecast_ttl),
            points: PointCache::new(Arc::clone(&store)),
            gridpoints: GridpointStore::new(Arc::clone(&store)),
            stations: StationStore::new(Arc::clone(&store)),
            resolver,
            store,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Resolves a coordinate to its gridpoint.
    ///
    /// # Arguments
    ///
    /// * `.location(LatLon)`: **Required.** The coordinate to resolve.
    /// * `.reuse_radius_m(f64)`: Optional. Overrides [`CacheConfig::reuse_radius_m`].
    /// * `.point_ttl(TimeDelta)`: Optional. Overrides [`CacheConfig::point_ttl`]
    ///   for a resolution stored by this call.
    /// * `.now(DateTime<Utc>)`: Optional. Defaults to the current time.
    ///
    /// # Errors
    ///
    /// [`GridCacheError::Resolution`] for an invalid coordinate or a failed
    /// upstream resolution.
    #[builder]
    pub async fn resolve(
        &self,
        location: LatLon,
        reuse_radius_m: Option<f64>,
        point_ttl: Option<TimeDelta>,
        now: Option<DateTime<Utc>>,
    ) -> Result<Resolution, GridCacheError> {
        let policy = self.policy(reuse_radius_m, point_ttl);
        Ok(self
            .resolver
            .resolve_at(location, policy, now.unwrap_or_else(Utc::now))
            .await?)
    }

    /// Returns one forecast product for a coordinate.
    ///
    /// # Arguments
    ///
    /// * `.location(LatLon)`: **Required.**
    /// * `.forecast_type(ForecastType)`: **Required.**
    /// * `.reuse_radius_m(f64)`, `.point_ttl(TimeDelta)`: Optional resolution overrides.
    /// * `.ttl(TimeDelta)`: Optional. Overrides [`CacheConfig::forecast_ttl`].
    /// * `.now(DateTime<Utc>)`: Optional. Defaults to the current time.
    ///
    /// The returned entry may be stale (see [`ForecastCacheEntry::is_stale`])
    /// when a refresh failed and an older payload was available.
    #[builder]
    pub async fn forecast(
        &self,
        location: LatLon,
        forecast_type: ForecastType,
        reuse_radius_m: Option<f64>,
        point_ttl: Option<TimeDelta>,
        ttl: Option<TimeDelta>,
        now: Option<DateTime<Utc>>,
    ) -> Result<ForecastCacheEntry, GridCacheError> {
        let policy = self.policy(reuse_radius_m, point_ttl);
        self.forecasts
            .forecast_at(
                location,
                forecast_type,
                policy,
                ttl.unwrap_or(self.config.forecast_ttl),
                now.unwrap_or_else(Utc::now),
            )
            .await
    }

    /// Returns every forecast product the coordinate's gridpoint publishes.
    /// Takes the same optional arguments as [`GridCache::forecast`].
    #[builder]
    pub async fn bundle(
        &self,
        location: LatLon,
        reuse_radius_m: Option<f64>,
        point_ttl: Option<TimeDelta>,
        ttl: Option<TimeDelta>,
        now: Option<DateTime<Utc>>,
    ) -> Result<ForecastBundle, GridCacheError> {
        let policy = self.policy(reuse_radius_m, point_ttl);
        self.forecasts
            .bundle_at(
                location,
                policy,
                ttl.unwrap_or(self.config.forecast_ttl),
                now.unwrap_or_else(Utc::now),
            )
            .await
    }

    /// Stations linked to a gridpoint, best first.
    pub fn stations(
        &self,
        gridpoint: GridpointId,
    ) -> Result<Vec<(GridpointStationLink, Station)>, GridCacheError> {
        self.stations.ranked(gridpoint)
    }

    /// Records that an observation was just read from station `code`.
    pub fn mark_observed(&self, code: &str) -> Result<bool, GridCacheError> {
        self.stations.mark_observed(code, Utc::now())
    }

    /// Drops a gridpoint with its point entries, forecasts and station links.
    pub fn evict(&self, gridpoint: GridpointId) -> Result<bool, GridCacheError> {
        self.gridpoints.evict(gridpoint)
    }

    /// Removes point entries that are no longer useful as of `now`, keeping
    /// never-superseded ones for [`CacheConfig::point_retention`].
    pub fn purge(&self, now: DateTime<Utc>) -> Result<usize, GridCacheError> {
        self.points.purge(now, self.config.point_retention)
    }

    fn policy(&self, reuse_radius_m: Option<f64>, point_ttl: Option<TimeDelta>) -> ResolvePolicy {
        let defaults = self.config.resolve_policy();
        ResolvePolicy {
            reuse_radius_m: reuse_radius_m.unwrap_or(defaults.reuse_radius_m),
            point_ttl: point_ttl.unwrap_or(defaults.point_ttl),
        }
    }
}
