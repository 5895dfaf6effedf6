mod config;
mod error;
mod forecast;
mod geo;
mod gridcache;
mod gridpoint_store;
mod inflight;
mod point_cache;
mod resolver;
mod station_store;
mod store;
mod types;
mod upstream;
mod utils;

#[cfg(test)]
mod test_support;

pub use error::{FetchError, GridCacheError, StorageError, ValidationError};
pub use gridcache::*;

pub use config::{
    CacheConfig, ResolvePolicy, DEFAULT_ERROR_BACKOFF_SECS, DEFAULT_REUSE_RADIUS_M,
    DEFAULT_UPSTREAM_TIMEOUT,
};
pub use geo::distance_m;
pub use utils::{default_snapshot_path, format_http_date, get_cache_dir, parse_http_date};

pub use forecast::{ForecastBundle, ForecastCache, ForecastService};
pub use gridpoint_store::GridpointStore;
pub use inflight::InFlight;
pub use point_cache::{PointCache, PointMatch};
pub use resolver::{GridpointResolver, Resolution, ResolutionOrigin};
pub use station_store::StationStore;
pub use store::{CacheStore, MemoryStore};

pub use types::forecast::*;
pub use types::gridpoint::*;
pub use types::location::*;
pub use types::point_entry::*;
pub use types::station::*;

pub use upstream::{
    ForecastClient, ForecastFetch, ForecastResponse, Freshness, PointsClient, PointsResponse,
    StationPayload, StationsClient,
};

pub use forecast::error::ForecastError;
pub use resolver::error::ResolutionError;
