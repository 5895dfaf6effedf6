use crate::forecast::error::ForecastError;
use crate::resolver::error::ResolutionError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridCacheError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Forecast(#[from] ForecastError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Bad input from the caller. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Latitude and longitude must be real numbers, got ({lat}, {lon})")]
    NotANumber { lat: f64, lon: f64 },

    #[error("Latitude {0} out of range (-90..90)")]
    LatitudeOutOfRange(f64),

    #[error("Longitude {0} out of range (-180..180)")]
    LongitudeOutOfRange(f64),

    #[error("Coordinate ({lat}, {lon}) is outside the configured bounds")]
    OutOfBounds { lat: f64, lon: f64 },

    #[error("Reuse radius must be a positive number of meters, got {0}")]
    InvalidRadius(f64),

    #[error("Time-to-live must not be negative, got {0}")]
    NegativeTtl(chrono::TimeDelta),

    #[error("Unknown forecast type '{0}' (expected forecast, hourly or griddata)")]
    UnknownForecastType(String),
}

// Clone because storage failures can end up inside shared in-flight results.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Storage lock poisoned while accessing {0}")]
    LockPoisoned(&'static str),

    #[error("Gridpoint {0} does not exist")]
    UnknownGridpoint(u64),

    #[error("Forecast from {0} has no gridpoint to be stored under")]
    UnkeyedForecast(String),

    #[error("Failed to read snapshot file '{path}': {message}")]
    SnapshotRead { path: PathBuf, message: String },

    #[error("Failed to write snapshot file '{path}': {message}")]
    SnapshotWrite { path: PathBuf, message: String },

    #[error("Failed to encode snapshot: {0}")]
    SnapshotEncode(String),

    #[error("Failed to decode snapshot from '{path}': {message}")]
    SnapshotDecode { path: PathBuf, message: String },

    #[error("Storage backend failure: {0}")]
    Backend(String),
}

/// Failure reported by (or while waiting on) an upstream collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("Upstream request for {url} timed out after {timeout:?}")]
    Timeout {
        url: String,
        timeout: std::time::Duration,
    },

    #[error("Network request failed for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP request failed for {url} with status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Malformed upstream payload from {url}: {message}")]
    Malformed { url: String, message: String },
}

impl FetchError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            FetchError::Timeout { url, .. }
            | FetchError::Transport { url, .. }
            | FetchError::HttpStatus { url, .. }
            | FetchError::Malformed { url, .. } => url,
        }
    }
}
