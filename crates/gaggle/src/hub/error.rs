//! Hub errors.

use thiserror::Error;

use crate::store::StoreError;

/// Errors returned to callers of a hub handle.
#[derive(Debug, Error)]
pub enum HubError {
    /// The request was rejected before reaching the hub loop.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The target of a delete does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The transcript store failed. The hub keeps running.
    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),

    /// The hub loop has stopped.
    #[error("hub is not running")]
    Closed,
}

impl From<StoreError> for HubError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Storage(other),
        }
    }
}

pub type HubResult<T> = Result<T, HubError>;
