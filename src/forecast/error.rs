use crate::error::{FetchError, ValidationError};
use crate::types::forecast::ForecastType;
use crate::types::gridpoint::GridpointKey;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Nothing cached and the fetch failed.
    #[error("No {forecast_type} forecast available from {url}: {source}")]
    Unavailable {
        url: String,
        forecast_type: ForecastType,
        #[source]
        source: FetchError,
    },

    #[error("Gridpoint {gridpoint} has no {forecast_type} URL")]
    MissingUrl {
        gridpoint: GridpointKey,
        forecast_type: ForecastType,
    },
}
