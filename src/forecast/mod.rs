pub mod error;
mod forecast_cache;
mod forecast_service;

pub use forecast_cache::ForecastCache;
pub use forecast_service::{ForecastBundle, ForecastService};
