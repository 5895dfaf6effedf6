//! Contracts with the upstream weather API.
//!
//! The cache never talks HTTP itself. Whoever embeds it supplies
//! implementations of these traits; the cache decides *when* to call them,
//! bounds each call with a timeout and makes sure concurrent callers share
//! a single in-flight request per key.

use crate::error::FetchError;
use crate::types::gridpoint::GridpointMetadata;
use crate::types::location::LatLon;
use crate::utils::parse_http_date;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

/// How long upstream says a response stays fresh, from its `Cache-Control:
/// max-age` and `Expires` headers. Both absent means the cache's own TTL
/// applies.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Freshness {
    pub max_age: Option<TimeDelta>,
    pub expires: Option<DateTime<Utc>>,
}

impl Freshness {
    /// Builds freshness from raw header values. Unparseable values are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::TimeDelta;
    /// use gridpoint_cache::Freshness;
    ///
    /// let freshness = Freshness::from_headers(Some("public, max-age=3600"), None);
    /// assert_eq!(freshness.max_age, Some(TimeDelta::hours(1)));
    /// ```
    pub fn from_headers(cache_control: Option<&str>, expires: Option<&str>) -> Self {
        Self {
            max_age: cache_control.and_then(parse_max_age),
            expires: expires.and_then(parse_http_date),
        }
    }

    /// Time to live for a response received at `now`. `max-age` wins over
    /// `Expires`, and `default_ttl` applies when upstream sent neither.
    /// Never negative.
    pub fn ttl(&self, default_ttl: TimeDelta, now: DateTime<Utc>) -> TimeDelta {
        let ttl = match (self.max_age, self.expires) {
            (Some(max_age), _) => max_age,
            (None, Some(expires)) => expires - now,
            (None, None) => default_ttl,
        };
        ttl.max(TimeDelta::zero())
    }
}

fn parse_max_age(cache_control: &str) -> Option<TimeDelta> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("max-age") {
            return None;
        }
        let seconds: u32 = value.trim().trim_matches('"').parse().ok()?;
        Some(TimeDelta::seconds(i64::from(seconds)))
    })
}

/// Result of resolving a coordinate through the upstream "points" endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PointsResponse {
    pub metadata: GridpointMetadata,
    /// The point the upstream API considers the resolved location, if reported.
    pub reference_point: Option<LatLon>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub freshness: Freshness,
}

/// One observation station, as listed by the upstream stations endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct StationPayload {
    pub code: String,
    pub name: Option<String>,
    pub location: Option<LatLon>,
    pub elevation_m: Option<f64>,
    pub time_zone: Option<String>,
    pub raw: serde_json::Value,
}

/// Successful body returned by a forecast fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub freshness: Freshness,
}

/// Outcome of a (possibly conditional) forecast fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum ForecastFetch {
    /// The validators matched; the cached body is still current. Upstream
    /// may hand back refreshed validators and a new freshness lifetime.
    NotModified {
        etag: Option<String>,
        last_modified: Option<DateTime<Utc>>,
        freshness: Freshness,
    },
    Fetched(ForecastResponse),
}

#[async_trait]
pub trait PointsClient: Send + Sync {
    /// Resolves a coordinate to its gridpoint.
    async fn resolve(&self, location: LatLon) -> Result<PointsResponse, FetchError>;
}

#[async_trait]
pub trait StationsClient: Send + Sync {
    /// Lists the stations for a gridpoint in upstream priority order.
    async fn list(&self, stations_url: &str) -> Result<Vec<StationPayload>, FetchError>;
}

#[async_trait]
pub trait ForecastClient: Send + Sync {
    /// Fetches `url`, sending `etag`/`last_modified` as conditional validators
    /// when present.
    async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<DateTime<Utc>>,
    ) -> Result<ForecastFetch, FetchError>;
}

/// Runs an upstream call with the caller's timeout, mapping expiry to
/// [`FetchError::Timeout`].
pub(crate) async fn with_timeout<T, F>(
    url: &str,
    timeout: std::time::Duration,
    call: F,
) -> Result<T, FetchError>
where
    F: std::future::Future<Output = Result<T, FetchError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            url: url.to_string(),
            timeout,
        }),
    }
}
