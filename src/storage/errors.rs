//! Storage error types
//!
//! The façade propagates partition and index failures unchanged and adds
//! the concerns it owns: document serialization and the version check the
//! stream-level collaborator performs before committing writes.

use thiserror::Error;

use crate::index::IndexError;
use crate::partition::PartitionError;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failure in the underlying partition.
    #[error(transparent)]
    Partition(#[from] PartitionError),

    /// Failure in one of the indexes.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// `ensure_index` was called with the reserved primary index name.
    #[error("Index name {0:?} is reserved")]
    ReservedIndexName(String),

    /// An operation referenced an index this storage does not hold.
    #[error("Unknown index: {0}")]
    UnknownIndex(String),

    /// An expected index version did not match the current index length.
    /// Raised by stream-level writers performing optimistic concurrency
    /// checks against [`index_len`](crate::Storage::index_len).
    #[error("Optimistic concurrency failure: expected version {expected}, found {actual}")]
    OptimisticConcurrency { expected: u64, actual: u64 },

    /// A mutation was attempted against a closed storage.
    #[error("Storage is not open")]
    NotOpen,

    /// Underlying I/O failure.
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}
