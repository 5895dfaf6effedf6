//! Latest-wins cache of forecast payloads per (gridpoint, forecast type).
//!
//! Fresh rows are served without touching upstream. Expired rows are
//! revalidated with their stored `ETag`/`Last-Modified`. A failed refresh
//! keeps serving the previous payload for a short backoff instead of failing.

use crate::config::{check_ttl, DEFAULT_ERROR_BACKOFF_SECS, DEFAULT_UPSTREAM_TIMEOUT};
use crate::error::FetchError;
use crate::forecast::error::ForecastError;
use crate::inflight::InFlight;
use crate::store::CacheStore;
use crate::types::forecast::{ForecastCacheEntry, ForecastType};
use crate::types::gridpoint::GridpointId;
use crate::upstream::{with_timeout, ForecastClient, ForecastFetch, ForecastResponse};
use bon::bon;
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

type Key = (GridpointId, ForecastType);

struct ForecastCacheInner {
    store: Arc<dyn CacheStore>,
    client: Arc<dyn ForecastClient>,
    timeout: Duration,
    error_backoff: TimeDelta,
    in_flight: InFlight<Key, Result<ForecastCacheEntry, ForecastError>>,
}

#[derive(Clone)]
pub struct ForecastCache {
    inner: Arc<ForecastCacheInner>,
}

#[bon]
impl ForecastCache {
    #[builder]
    pub fn new(
        store: Arc<dyn CacheStore>,
        client: Arc<dyn ForecastClient>,
        #[builder(default = DEFAULT_UPSTREAM_TIMEOUT)] timeout: Duration,
        #[builder(default = TimeDelta::seconds(DEFAULT_ERROR_BACKOFF_SECS))]
        error_backoff: TimeDelta,
    ) -> Self {
        Self {
            inner: Arc::new(ForecastCacheInner {
                store,
                client,
                timeout,
                error_backoff,
                in_flight: InFlight::new(),
            }),
        }
    }

    /// Returns the forecast of `forecast_type` for `gridpoint`, fetching
    /// `url` only when the cached row is missing or expired at `now`.
    ///
    /// A refreshed row expires when upstream's `max-age`/`Expires` says so,
    /// or at `now + ttl` if it said nothing. When the refresh fails but an
    /// older payload exists, that payload is returned with the failure
    /// recorded on it (see [`ForecastCacheEntry::is_stale`]) and the row
    /// expires after the error backoff instead.
    ///
    /// Concurrent calls for the same key share one upstream request.
    ///
    /// # Errors
    ///
    /// [`ForecastError::Validation`] for a negative `ttl` and
    /// [`ForecastError::Unavailable`] when nothing is cached and the fetch
    /// fails.
    pub async fn get(
        &self,
        gridpoint: GridpointId,
        forecast_type: ForecastType,
        url: &str,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<ForecastCacheEntry, ForecastError> {
        check_ttl(ttl)?;

        if let Some(entry) = self.inner.cached(gridpoint, forecast_type) {
            if entry.is_live(now) {
                debug!("Forecast cache hit for {} {}", gridpoint, forecast_type);
                return Ok(entry);
            }
        }

        let inner = Arc::clone(&self.inner);
        let url = url.to_string();
        self.inner
            .in_flight
            .run((gridpoint, forecast_type), move || async move {
                inner.refresh(gridpoint, forecast_type, url, ttl, now).await
            })
            .await
    }

    /// Fetches `url` without reading or writing the cache, for gridpoints
    /// that have no stored id. The entry's `gridpoint` is `None`.
    ///
    /// # Errors
    ///
    /// [`ForecastError::Validation`] for a negative `ttl` and
    /// [`ForecastError::Unavailable`] when the fetch fails.
    pub async fn fetch_uncached(
        &self,
        forecast_type: ForecastType,
        url: &str,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<ForecastCacheEntry, ForecastError> {
        check_ttl(ttl)?;
        info!("Fetching {} forecast from {} without caching", forecast_type, url);
        let unavailable = |source: FetchError| ForecastError::Unavailable {
            url: url.to_string(),
            forecast_type,
            source,
        };

        let fetched = with_timeout(url, self.inner.timeout, self.inner.client.fetch(url, None, None))
            .await
            .map_err(unavailable)?;
        match fetched {
            ForecastFetch::Fetched(response) if (200..300).contains(&response.status_code) => Ok(
                fresh_entry(None, forecast_type, url.to_string(), response, ttl, now),
            ),
            ForecastFetch::Fetched(response) => Err(unavailable(FetchError::HttpStatus {
                url: url.to_string(),
                status: response.status_code,
            })),
            ForecastFetch::NotModified { .. } => Err(unavailable(FetchError::Malformed {
                url: url.to_string(),
                message: "not modified reply to an unconditional request".to_string(),
            })),
        }
    }
}

fn fresh_entry(
    gridpoint: Option<GridpointId>,
    forecast_type: ForecastType,
    url: String,
    response: ForecastResponse,
    ttl: TimeDelta,
    now: DateTime<Utc>,
) -> ForecastCacheEntry {
    ForecastCacheEntry {
        gridpoint,
        forecast_type,
        url,
        payload: response.body,
        status_code: Some(response.status_code),
        error: None,
        etag: response.etag,
        last_modified: response.last_modified,
        fetched_at: now,
        expires_at: now + response.freshness.ttl(ttl, now),
    }
}

impl ForecastCacheInner {
    fn cached(&self, gridpoint: GridpointId, forecast_type: ForecastType) -> Option<ForecastCacheEntry> {
        match self.store.forecast(gridpoint, forecast_type) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    "Forecast cache read failed for {} {}, refetching: {}",
                    gridpoint, forecast_type, e
                );
                None
            }
        }
    }

    async fn refresh(
        &self,
        gridpoint: GridpointId,
        forecast_type: ForecastType,
        url: String,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<ForecastCacheEntry, ForecastError> {
        let previous = self.cached(gridpoint, forecast_type);
        if let Some(entry) = previous.as_ref().filter(|e| e.is_live(now)) {
            return Ok(entry.clone());
        }

        let (etag, last_modified) = previous
            .as_ref()
            .map(|e| (e.etag.clone(), e.last_modified))
            .unwrap_or_default();
        info!(
            "Fetching {} forecast for gridpoint {} from {}",
            forecast_type, gridpoint, url
        );
        let fetched = with_timeout(
            &url,
            self.timeout,
            self.client.fetch(&url, etag.as_deref(), last_modified),
        )
        .await;

        let entry = match (fetched, previous) {
            (Ok(ForecastFetch::Fetched(response)), _)
                if (200..300).contains(&response.status_code) =>
            {
                fresh_entry(Some(gridpoint), forecast_type, url, response, ttl, now)
            }
            (Ok(ForecastFetch::Fetched(response)), previous) => {
                let error = FetchError::HttpStatus {
                    url: url.clone(),
                    status: response.status_code,
                };
                self.serve_stale(gridpoint, forecast_type, url, previous, error, now)?
            }
            (
                Ok(ForecastFetch::NotModified {
                    etag,
                    last_modified,
                    freshness,
                }),
                Some(previous),
            ) => {
                debug!("{} forecast for gridpoint {} not modified", forecast_type, gridpoint);
                ForecastCacheEntry {
                    url,
                    status_code: Some(304),
                    error: None,
                    etag: etag.or(previous.etag),
                    last_modified: last_modified.or(previous.last_modified),
                    fetched_at: now,
                    expires_at: now + freshness.ttl(ttl, now),
                    ..previous
                }
            }
            (Ok(ForecastFetch::NotModified { .. }), None) => {
                let error = FetchError::Malformed {
                    url: url.clone(),
                    message: "not modified reply without a cached payload".to_string(),
                };
                self.serve_stale(gridpoint, forecast_type, url, None, error, now)?
            }
            (Err(error), previous) => {
                self.serve_stale(gridpoint, forecast_type, url, previous, error, now)?
            }
        };

        if let Err(e) = self.store.upsert_forecast(entry.clone()) {
            warn!(
                "Failed to store {} forecast for gridpoint {}: {}",
                forecast_type, gridpoint, e
            );
        }
        Ok(entry)
    }

    /// Keeps the previous payload with the failure recorded on it, or reports
    /// the forecast unavailable when there is nothing to fall back to.
    fn serve_stale(
        &self,
        gridpoint: GridpointId,
        forecast_type: ForecastType,
        url: String,
        previous: Option<ForecastCacheEntry>,
        error: FetchError,
        now: DateTime<Utc>,
    ) -> Result<ForecastCacheEntry, ForecastError> {
        let Some(previous) = previous else {
            warn!(
                "{} forecast for gridpoint {} unavailable: {}",
                forecast_type, gridpoint, error
            );
            return Err(ForecastError::Unavailable {
                url,
                forecast_type,
                source: error,
            });
        };
        warn!(
            "Serving stale {} forecast for gridpoint {} (fetched {}): {}",
            forecast_type, gridpoint, previous.fetched_at, error
        );
        Ok(ForecastCacheEntry {
            url,
            status_code: error.status_code(),
            error: Some(error.to_string()),
            expires_at: now + self.error_backoff,
            ..previous
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::{fetched, metadata, ts, FakeForecastClient, FlakyStore};
    use crate::config::CacheConfig;
    use crate::upstream::Freshness;
    use futures_util::future::join_all;
    use serde_json::json;

    const URL: &str = "https://api.weather.gov/gridpoints/CTP/72,85/forecast/hourly";

    fn ttl() -> TimeDelta {
        TimeDelta::minutes(10)
    }

    struct Harness {
        store: Arc<MemoryStore>,
        client: Arc<FakeForecastClient>,
        cache: ForecastCache,
        gridpoint: GridpointId,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let gridpoint = store
            .upsert_gridpoint(metadata("CTP", 72, 85), ts(0))
            .expect("upsert");
        let client = Arc::new(FakeForecastClient::new());
        let cache = ForecastCache::builder()
            .store(store.clone())
            .client(client.clone())
            .build();
        Harness {
            store,
            client,
            cache,
            gridpoint,
        }
    }

    impl Harness {
        async fn get(&self, at: i64) -> Result<ForecastCacheEntry, ForecastError> {
            self.cache
                .get(self.gridpoint, ForecastType::Hourly, URL, ttl(), ts(at))
                .await
        }
    }

    #[tokio::test]
    async fn test_fresh_row_is_served_without_fetch() -> Result<(), ForecastError> {
        let h = harness();
        h.client.push(Ok(fetched(json!({"periods": [1, 2]}), "\"v1\"")));

        let first = h.get(0).await?;
        let second = h.get(599).await?;
        assert_eq!(h.client.calls(), 1);
        assert_eq!(second.payload, json!({"periods": [1, 2]}));
        assert_eq!(second.etag.as_deref(), Some("\"v1\""));
        assert_eq!(first, second);
        assert_eq!(first.expires_at, ts(600));
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_row_is_revalidated() -> Result<(), ForecastError> {
        let h = harness();
        h.client.push(Ok(fetched(json!({"v": 1}), "\"v1\"")));
        h.client.push(Ok(ForecastFetch::NotModified {
            etag: None,
            last_modified: None,
            freshness: Freshness::default(),
        }));

        h.get(0).await?;
        let revalidated = h.get(600).await?;

        let seen = h.client.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].etag, None);
        assert_eq!(seen[1].etag.as_deref(), Some("\"v1\""));
        assert_eq!(seen[1].last_modified, Some(ts(0)));

        assert_eq!(revalidated.payload, json!({"v": 1}));
        assert_eq!(revalidated.status_code, Some(304));
        assert_eq!(revalidated.etag.as_deref(), Some("\"v1\""));
        assert_eq!(revalidated.fetched_at, ts(600));
        assert_eq!(revalidated.expires_at, ts(1200));
        Ok(())
    }

    #[tokio::test]
    async fn test_changed_payload_replaces_row() -> Result<(), ForecastError> {
        let h = harness();
        h.client.push(Ok(fetched(json!({"v": 1}), "\"v1\"")));
        h.client.push(Ok(fetched(json!({"v": 2}), "\"v2\"")));

        h.get(0).await?;
        let refreshed = h.get(700).await?;
        assert_eq!(refreshed.payload, json!({"v": 2}));
        assert_eq!(refreshed.etag.as_deref(), Some("\"v2\""));

        let stored = h
            .store
            .forecast(h.gridpoint, ForecastType::Hourly)
            .expect("read")
            .expect("row");
        assert_eq!(stored, refreshed);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale_with_backoff() -> Result<(), ForecastError> {
        let h = harness();
        h.client.push(Ok(fetched(json!({"v": 1}), "\"v1\"")));
        h.client.push(Err(FetchError::HttpStatus {
            url: URL.to_string(),
            status: 503,
        }));

        h.get(0).await?;
        let stale = h.get(600).await?;
        assert!(stale.is_stale());
        assert_eq!(stale.payload, json!({"v": 1}));
        assert_eq!(stale.status_code, Some(503));
        assert_eq!(stale.etag.as_deref(), Some("\"v1\""));
        assert_eq!(stale.fetched_at, ts(0));
        assert_eq!(stale.expires_at, ts(660));

        // Inside the backoff nothing is retried.
        h.get(659).await?;
        assert_eq!(h.client.calls(), 2);

        let recovered = h.get(660).await?;
        assert_eq!(h.client.calls(), 3);
        assert!(!recovered.is_stale());
        assert_eq!(recovered.expires_at, ts(1260));
        Ok(())
    }

    #[tokio::test]
    async fn test_first_failure_is_unavailable() {
        let h = harness();
        h.client.push(Err(FetchError::Transport {
            url: URL.to_string(),
            message: "connection refused".to_string(),
        }));

        let result = h.get(0).await;
        assert!(matches!(
            result,
            Err(ForecastError::Unavailable {
                forecast_type: ForecastType::Hourly,
                source: FetchError::Transport { .. },
                ..
            })
        ));
        assert!(h
            .store
            .forecast(h.gridpoint, ForecastType::Hourly)
            .expect("read")
            .is_none());
    }

    #[tokio::test]
    async fn test_error_status_without_row_is_unavailable() {
        let h = harness();
        h.client.push(Ok(ForecastFetch::Fetched(ForecastResponse {
            status_code: 500,
            body: json!({"title": "Unexpected Problem"}),
            etag: None,
            last_modified: None,
            freshness: Freshness::default(),
        })));
        assert!(matches!(
            h.get(0).await,
            Err(ForecastError::Unavailable {
                source: FetchError::HttpStatus { status: 500, .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_not_modified_without_row_is_unavailable() {
        let h = harness();
        h.client.push(Ok(ForecastFetch::NotModified {
            etag: None,
            last_modified: None,
            freshness: Freshness::default(),
        }));
        assert!(matches!(
            h.get(0).await,
            Err(ForecastError::Unavailable {
                source: FetchError::Malformed { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_unavailable_and_retryable() {
        let store = Arc::new(MemoryStore::new());
        let gridpoint = store
            .upsert_gridpoint(metadata("CTP", 72, 85), ts(0))
            .expect("upsert");
        let client = Arc::new(FakeForecastClient::new());
        client.set_delay(Duration::from_millis(500));
        let cache = ForecastCache::builder()
            .store(store)
            .client(client.clone())
            .timeout(Duration::from_millis(20))
            .build();

        let result = cache
            .get(gridpoint, ForecastType::Forecast, URL, ttl(), ts(0))
            .await;
        assert!(matches!(
            result,
            Err(ForecastError::Unavailable {
                source: FetchError::Timeout { .. },
                ..
            })
        ));
        assert!(cache.inner.in_flight.is_empty());

        client.set_delay(Duration::ZERO);
        assert!(cache
            .get(gridpoint, ForecastType::Forecast, URL, ttl(), ts(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_fetch() {
        let h = harness();
        h.client.set_delay(Duration::from_millis(30));

        let results = join_all((0..8).map(|_| h.get(0))).await;
        assert_eq!(h.client.calls(), 1);
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_types_are_cached_independently() -> Result<(), ForecastError> {
        let h = harness();
        h.cache
            .get(h.gridpoint, ForecastType::Forecast, URL, ttl(), ts(0))
            .await?;
        h.cache
            .get(h.gridpoint, ForecastType::Griddata, URL, ttl(), ts(0))
            .await?;
        assert_eq!(h.client.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_negative_ttl_is_rejected() {
        let h = harness();
        let result = h
            .cache
            .get(
                h.gridpoint,
                ForecastType::Hourly,
                URL,
                TimeDelta::seconds(-1),
                ts(0),
            )
            .await;
        assert!(matches!(result, Err(ForecastError::Validation(_))));
        assert_eq!(h.client.calls(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_store_refetches() -> Result<(), ForecastError> {
        let store = Arc::new(FlakyStore::new());
        let gridpoint = store
            .upsert_gridpoint(metadata("CTP", 72, 85), ts(0))
            .expect("upsert");
        let client = Arc::new(FakeForecastClient::new());
        let cache = ForecastCache::builder()
            .store(store.clone())
            .client(client.clone())
            .build();

        cache.get(gridpoint, ForecastType::Hourly, URL, ttl(), ts(0)).await?;
        store.fail_reads(true);
        store.fail_writes(true);
        let entry = cache.get(gridpoint, ForecastType::Hourly, URL, ttl(), ts(1)).await?;
        assert_eq!(client.calls(), 2);
        assert_eq!(entry.fetched_at, ts(1));
        Ok(())
    }

    fn fetched_with(freshness: Freshness) -> ForecastFetch {
        ForecastFetch::Fetched(ForecastResponse {
            status_code: 200,
            body: json!({"v": 1}),
            etag: Some("\"v1\"".to_string()),
            last_modified: None,
            freshness,
        })
    }

    #[tokio::test]
    async fn test_upstream_max_age_overrides_ttl() -> Result<(), ForecastError> {
        let h = harness();
        h.client.push(Ok(fetched_with(Freshness {
            max_age: Some(TimeDelta::seconds(120)),
            expires: Some(ts(3600)),
        })));

        let first = h.get(0).await?;
        assert_eq!(first.expires_at, ts(120));
        h.get(119).await?;
        assert_eq!(h.client.calls(), 1);
        h.get(120).await?;
        assert_eq!(h.client.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_expires_in_the_past_is_refetched() -> Result<(), ForecastError> {
        let h = harness();
        h.client.push(Ok(fetched_with(Freshness {
            max_age: None,
            expires: Some(ts(-60)),
        })));

        let first = h.get(0).await?;
        assert_eq!(first.expires_at, ts(0));
        assert!(!first.is_live(ts(0)));
        h.get(0).await?;
        assert_eq!(h.client.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_not_modified_carries_new_freshness() -> Result<(), ForecastError> {
        let h = harness();
        h.client.push(Ok(fetched(json!({"v": 1}), "\"v1\"")));
        h.client.push(Ok(ForecastFetch::NotModified {
            etag: None,
            last_modified: None,
            freshness: Freshness {
                max_age: Some(TimeDelta::hours(1)),
                expires: None,
            },
        }));

        h.get(0).await?;
        let revalidated = h.get(600).await?;
        assert_eq!(revalidated.status_code, Some(304));
        assert_eq!(revalidated.expires_at, ts(4200));
        Ok(())
    }

    #[test]
    fn test_builder_defaults_follow_config() {
        let h = harness();
        let config = CacheConfig::default();
        assert_eq!(h.cache.inner.timeout, config.upstream_timeout);
        assert_eq!(h.cache.inner.error_backoff, config.error_backoff);
    }

    #[tokio::test]
    async fn test_uncached_fetch_skips_the_store() -> Result<(), ForecastError> {
        let h = harness();
        let first = h
            .cache
            .fetch_uncached(ForecastType::Hourly, URL, ttl(), ts(0))
            .await?;
        assert_eq!(first.gridpoint, None);
        assert_eq!(first.payload, json!({"url": URL}));
        assert_eq!(first.expires_at, ts(600));
        assert!(h
            .store
            .forecast(h.gridpoint, ForecastType::Hourly)
            .expect("read")
            .is_none());

        h.cache
            .fetch_uncached(ForecastType::Hourly, URL, ttl(), ts(1))
            .await?;
        let seen = h.client.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].etag, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_uncached_fetch_failure_is_unavailable() {
        let h = harness();
        h.client.push(Err(FetchError::HttpStatus {
            url: URL.to_string(),
            status: 503,
        }));
        let result = h
            .cache
            .fetch_uncached(ForecastType::Forecast, URL, ttl(), ts(0))
            .await;
        assert_eq!(
            result,
            Err(ForecastError::Unavailable {
                url: URL.to_string(),
                forecast_type: ForecastType::Forecast,
                source: FetchError::HttpStatus {
                    url: URL.to_string(),
                    status: 503,
                },
            })
        );
    }
}
