//! Forecasts by coordinate: resolve the gridpoint, then serve each product
//! through the forecast cache.

use crate::config::ResolvePolicy;
use crate::error::GridCacheError;
use crate::forecast::error::ForecastError;
use crate::forecast::forecast_cache::ForecastCache;
use crate::resolver::{GridpointResolver, Resolution};
use crate::types::forecast::{ForecastCacheEntry, ForecastType};
use crate::types::location::LatLon;
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::join_all;
use log::warn;
use std::collections::BTreeMap;

/// Every forecast product known for one resolved coordinate.
#[derive(Debug, Clone)]
pub struct ForecastBundle {
    pub resolution: Resolution,
    /// One result per product the gridpoint has a URL for. A failed product
    /// does not fail the others.
    pub forecasts: BTreeMap<ForecastType, Result<ForecastCacheEntry, ForecastError>>,
}

#[derive(Clone)]
pub struct ForecastService {
    resolver: GridpointResolver,
    forecasts: ForecastCache,
    forecast_ttl: TimeDelta,
}

impl ForecastService {
    pub fn new(resolver: GridpointResolver, forecasts: ForecastCache, forecast_ttl: TimeDelta) -> Self {
        Self {
            resolver,
            forecasts,
            forecast_ttl,
        }
    }

    /// Resolves `location` with the resolver's configured policy and returns
    /// its `forecast_type` product.
    pub async fn forecast(
        &self,
        location: LatLon,
        forecast_type: ForecastType,
    ) -> Result<ForecastCacheEntry, GridCacheError> {
        let policy = self.resolver.config().resolve_policy();
        self.forecast_at(location, forecast_type, policy, self.forecast_ttl, Utc::now())
            .await
    }

    /// All products for `location` with the configured policy and TTL.
    pub async fn bundle(&self, location: LatLon) -> Result<ForecastBundle, GridCacheError> {
        let policy = self.resolver.config().resolve_policy();
        self.bundle_at(location, policy, self.forecast_ttl, Utc::now())
            .await
    }

    pub async fn forecast_at(
        &self,
        location: LatLon,
        forecast_type: ForecastType,
        policy: ResolvePolicy,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<ForecastCacheEntry, GridCacheError> {
        let resolution = self.resolver.resolve_at(location, policy, now).await?;
        Ok(self
            .forecast_for(&resolution, forecast_type, ttl, now)
            .await?)
    }

    /// Resolves once and gets every product the gridpoint publishes a URL
    /// for, concurrently. Products without a URL are left out.
    ///
    /// # Errors
    ///
    /// Only resolution failures fail the bundle; per-product failures are
    /// reported in [`ForecastBundle::forecasts`].
    pub async fn bundle_at(
        &self,
        location: LatLon,
        policy: ResolvePolicy,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<ForecastBundle, GridCacheError> {
        let resolution = self.resolver.resolve_at(location, policy, now).await?;
        let available: Vec<ForecastType> = ForecastType::ALL
            .into_iter()
            .filter(|t| resolution.gridpoint.url_for(*t).is_some())
            .collect();

        let results = join_all(
            available
                .iter()
                .map(|t| self.forecast_for(&resolution, *t, ttl, now)),
        )
        .await;
        let forecasts = available.into_iter().zip(results).collect();
        Ok(ForecastBundle {
            resolution,
            forecasts,
        })
    }

    /// The `forecast_type` product of an already resolved gridpoint.
    ///
    /// A gridpoint that could not be stored has no id to key a cache row by,
    /// so its product is fetched straight from upstream on every call.
    pub async fn forecast_for(
        &self,
        resolution: &Resolution,
        forecast_type: ForecastType,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<ForecastCacheEntry, ForecastError> {
        let url = resolution
            .gridpoint
            .url_for(forecast_type)
            .ok_or_else(|| ForecastError::MissingUrl {
                gridpoint: resolution.gridpoint.key().clone(),
                forecast_type,
            })?;
        match resolution.id {
            Some(id) => self.forecasts.get(id, forecast_type, url, ttl, now).await,
            None => {
                warn!(
                    "Gridpoint {} is not stored, fetching its {} forecast uncached",
                    resolution.gridpoint.key(),
                    forecast_type
                );
                self.forecasts
                    .fetch_uncached(forecast_type, url, ttl, now)
                    .await
            }
        }
    }
}
