//! Coordinate to gridpoint resolution.
//!
//! A request first consults the point cache. On a miss it joins any upstream
//! call already running for a coordinate within its reuse radius, or starts
//! one. The result is written to the gridpoint store, the point cache and the
//! station store before it is returned.

use crate::config::{CacheConfig, ResolvePolicy};
use crate::error::FetchError;
use crate::geo::distance_m;
use crate::gridpoint_store::GridpointStore;
use crate::inflight::InFlight;
use crate::point_cache::PointCache;
use crate::resolver::error::ResolutionError;
use crate::station_store::StationStore;
use crate::store::CacheStore;
use crate::types::gridpoint::{Gridpoint, GridpointId};
use crate::types::location::LatLon;
use crate::upstream::{with_timeout, PointsClient, PointsResponse, StationsClient};
use bon::bon;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOrigin {
    /// Reused from the point cache without an upstream call.
    Cache,
    /// Resolved by the upstream points endpoint.
    Upstream,
}

/// The gridpoint a coordinate resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// `None` when upstream answered but the gridpoint could not be stored.
    /// Such a resolution is still correct; it just cannot key cached rows.
    pub id: Option<GridpointId>,
    pub gridpoint: Gridpoint,
    pub origin: ResolutionOrigin,
    /// The coordinate whose resolution is being reused. For a fresh upstream
    /// resolution this is the query itself.
    pub resolved_from: LatLon,
    /// Meters between the query and `resolved_from`.
    pub distance_m: f64,
}

/// Exact query coordinate of an in-flight resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Origin {
    lat_bits: u64,
    lon_bits: u64,
}

impl Origin {
    fn new(location: LatLon) -> Self {
        Self {
            lat_bits: location.0.to_bits(),
            lon_bits: location.1.to_bits(),
        }
    }

    fn location(&self) -> LatLon {
        LatLon(f64::from_bits(self.lat_bits), f64::from_bits(self.lon_bits))
    }
}

/// Rounds in which a waiter may join a neighbour's call. After that it only
/// shares a call started for its exact coordinate.
const NEIGHBOUR_JOIN_ROUNDS: usize = 3;

struct ResolverInner {
    points: PointCache,
    gridpoints: GridpointStore,
    stations: StationStore,
    points_client: Arc<dyn PointsClient>,
    stations_client: Option<Arc<dyn StationsClient>>,
    config: CacheConfig,
    in_flight: InFlight<Origin, Result<Resolution, ResolutionError>>,
}

#[derive(Clone)]
pub struct GridpointResolver {
    inner: Arc<ResolverInner>,
}

#[bon]
impl GridpointResolver {
    /// Station links are only refreshed when a `stations_client` is given.
    #[builder]
    pub fn new(
        store: Arc<dyn CacheStore>,
        points_client: Arc<dyn PointsClient>,
        stations_client: Option<Arc<dyn StationsClient>>,
        #[builder(default)] config: CacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                points: PointCache::new(Arc::clone(&store)),
                gridpoints: GridpointStore::new(Arc::clone(&store)),
                stations: StationStore::new(store),
                points_client,
                stations_client,
                config,
                in_flight: InFlight::new(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Resolves `location` as of the current time.
    pub async fn resolve(
        &self,
        location: LatLon,
        policy: ResolvePolicy,
    ) -> Result<Resolution, ResolutionError> {
        self.resolve_at(location, policy, Utc::now()).await
    }

    /// Resolves `location` to a gridpoint, reusing a cached resolution within
    /// `policy.reuse_radius_m` when one is live at `now`.
    ///
    /// A miss joins an upstream call already in flight for any coordinate
    /// within the reuse radius, so concurrent misses around one place share a
    /// single call. A shared result that still lands outside the caller's
    /// radius is discarded and the caller goes through the registry again.
    ///
    /// # Errors
    ///
    /// [`ResolutionError::Validation`] for a bad coordinate or policy and
    /// [`ResolutionError::Fetch`] if the upstream call fails, times out or
    /// returns an unusable payload. Nothing is written in either case.
    /// Storage failures are logged and never surface here.
    pub async fn resolve_at(
        &self,
        location: LatLon,
        policy: ResolvePolicy,
        now: DateTime<Utc>,
    ) -> Result<Resolution, ResolutionError> {
        self.inner.config.check_location(location)?;
        policy.validate()?;

        if let Some(hit) = self.inner.cached(location, policy, now) {
            return Ok(hit);
        }

        let origin = Origin::new(location);
        let mut round = 0;
        loop {
            let neighbours = round < NEIGHBOUR_JOIN_ROUNDS;
            let nearby = |other: &Origin| {
                neighbours && distance_m(location, other.location()) <= policy.reuse_radius_m
            };
            let inner = Arc::clone(&self.inner);
            let shared = self
                .inner
                .in_flight
                .join_or_run(origin, nearby, move || async move {
                    inner.resolve_upstream(location, policy, now).await
                })
                .await?;

            if shared.resolved_from == location {
                return Ok(shared);
            }
            let distance = distance_m(location, shared.resolved_from);
            if distance <= policy.reuse_radius_m {
                return Ok(Resolution {
                    distance_m: distance,
                    ..shared
                });
            }
            debug!(
                "Shared resolution from ({}, {}) is {:.0} m away from ({}, {}), retrying",
                shared.resolved_from.0, shared.resolved_from.1, distance, location.0, location.1
            );
            round += 1;
        }
    }
}

impl ResolverInner {
    /// Point cache lookup that treats any storage trouble as a miss.
    fn cached(&self, location: LatLon, policy: ResolvePolicy, now: DateTime<Utc>) -> Option<Resolution> {
        let hit = match self.points.lookup(location, policy.reuse_radius_m, now) {
            Ok(hit) => hit?,
            Err(e) => {
                warn!(
                    "Point cache lookup failed for ({}, {}), falling back to upstream: {}",
                    location.0, location.1, e
                );
                return None;
            }
        };
        match self.gridpoints.get(hit.entry.gridpoint) {
            Ok(Some(gridpoint)) => Some(Resolution {
                id: Some(hit.entry.gridpoint),
                gridpoint,
                origin: ResolutionOrigin::Cache,
                resolved_from: hit.entry.location,
                distance_m: hit.distance_m,
            }),
            Ok(None) => {
                warn!(
                    "Point cache entry {} refers to missing gridpoint {}",
                    hit.entry.id.0, hit.entry.gridpoint
                );
                None
            }
            Err(e) => {
                warn!("Failed to load gridpoint {}: {}", hit.entry.gridpoint, e);
                None
            }
        }
    }

    async fn resolve_upstream(
        &self,
        location: LatLon,
        policy: ResolvePolicy,
        now: DateTime<Utc>,
    ) -> Result<Resolution, ResolutionError> {
        // Another call may have stored a usable resolution since our lookup.
        if let Some(hit) = self.cached(location, policy, now) {
            return Ok(hit);
        }

        let label = format!("points/{:.4},{:.4}", location.0, location.1);
        info!("Resolving ({}, {}) via upstream points endpoint", location.0, location.1);
        let response = with_timeout(
            &label,
            self.config.upstream_timeout,
            self.points_client.resolve(location),
        )
        .await?;

        if response.metadata.key.grid_id.trim().is_empty() {
            return Err(FetchError::Malformed {
                url: label,
                message: "points response has no grid id".to_string(),
            }
            .into());
        }
        Ok(self.persist(location, policy, response, now).await)
    }

    async fn persist(
        &self,
        location: LatLon,
        policy: ResolvePolicy,
        response: PointsResponse,
        now: DateTime<Utc>,
    ) -> Resolution {
        let PointsResponse {
            metadata,
            reference_point,
            etag,
            last_modified,
            freshness,
        } = response;
        let unstored = |metadata| Gridpoint {
            metadata,
            created_at: now,
            updated_at: now,
        };

        let id = match self.gridpoints.upsert(metadata.clone(), now) {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    "Gridpoint {} resolved but could not be stored: {}",
                    metadata.key, e
                );
                return Resolution {
                    id: None,
                    gridpoint: unstored(metadata),
                    origin: ResolutionOrigin::Upstream,
                    resolved_from: location,
                    distance_m: 0.0,
                };
            }
        };
        let gridpoint = match self.gridpoints.get(id) {
            Ok(Some(gridpoint)) => gridpoint,
            Ok(None) => unstored(metadata),
            Err(e) => {
                warn!("Failed to reload gridpoint {}: {}", id, e);
                unstored(metadata)
            }
        };

        let inserted = self
            .points
            .insert()
            .location(location)
            .gridpoint(id)
            .maybe_distance_m(reference_point.map(|point| distance_m(location, point)))
            .raw(gridpoint.metadata.raw.clone())
            .maybe_etag(etag)
            .maybe_last_modified(last_modified)
            .ttl(freshness.ttl(policy.point_ttl, now))
            .now(now)
            .call();
        if let Err(e) = inserted {
            warn!("Failed to cache resolution of ({}, {}): {}", location.0, location.1, e);
        }

        if let (Some(client), Some(url)) = (
            &self.stations_client,
            gridpoint.metadata.stations_url.as_deref(),
        ) {
            self.refresh_stations(client.as_ref(), id, url, now).await;
        }

        Resolution {
            id: Some(id),
            gridpoint,
            origin: ResolutionOrigin::Upstream,
            resolved_from: location,
            distance_m: 0.0,
        }
    }

    async fn refresh_stations(
        &self,
        client: &dyn StationsClient,
        gridpoint: GridpointId,
        url: &str,
        now: DateTime<Utc>,
    ) {
        match with_timeout(url, self.config.upstream_timeout, client.list(url)).await {
            Ok(listed) => {
                if let Err(e) = self.stations.refresh_stations(gridpoint, &listed, now) {
                    warn!("Failed to store stations for gridpoint {}: {}", gridpoint, e);
                }
            }
            Err(e) => warn!("Station list for gridpoint {} unavailable: {}", gridpoint, e),
        }
    }
}
