//! Storage errors.

use thiserror::Error;

/// Primary result code shared by `SQLITE_BUSY` and its extended forms.
const SQLITE_BUSY: i32 = 5;

/// Errors surfaced by the key-value store and the repositories built on it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No live record matched. Expired records report this too.
    #[error("{0} not found")]
    NotFound(String),

    /// The database rejected or failed an operation.
    #[error("storage failure: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be decoded or encoded.
    #[error("corrupt record {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether another writer got in first and the operation may be retried.
    ///
    /// Covers `SQLITE_BUSY_SNAPSHOT`, which a deferred transaction hits when
    /// it tries to write after its read snapshot went stale.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(err)) => err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .is_some_and(|code| code & 0xff == SQLITE_BUSY),
            _ => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
