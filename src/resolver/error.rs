use crate::error::{FetchError, ValidationError};
use thiserror::Error;

// Clone because one resolution result is handed to every concurrent waiter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Gridpoint resolution failed: {0}")]
    Fetch(#[from] FetchError),
}
