pub mod error;
mod gridpoint_resolver;

pub use gridpoint_resolver::{GridpointResolver, Resolution, ResolutionOrigin};
