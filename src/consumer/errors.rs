//! Consumer error types

use thiserror::Error;

use crate::storage::StorageError;

/// Result type for consumer operations
pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// Errors raised by consumer operations
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The sidecar state file exists but does not parse.
    #[error("Invalid consumer state file: {0}")]
    InvalidState(String),

    /// Failure propagated from the underlying storage.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Underlying I/O failure.
    #[error("Consumer I/O error: {0}")]
    Io(#[from] std::io::Error),
}
