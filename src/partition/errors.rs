//! Partition error types
//!
//! Structural failures are errors; expected misses (reads past the end,
//! reads against a closed partition) are `Ok(None)` on the read path.

use thiserror::Error;

/// Result type for partition operations
pub type PartitionResult<T> = Result<T, PartitionError>;

/// Errors raised by partition operations
#[derive(Debug, Error)]
pub enum PartitionError {
    /// The first header bytes do not spell the partition magic.
    #[error("Invalid partition file header: expected \"nesprt\", got {found:?}")]
    InvalidFileHeader { found: Vec<u8> },

    /// The magic matched but the version suffix is unsupported.
    #[error("Unsupported partition file version: {found:?}")]
    InvalidFileVersion { found: Vec<u8> },

    /// A record's framing is inconsistent: the declared length overruns
    /// the file, or the trailer byte is missing. Typically a torn write.
    #[error("Corrupt partition record at position {position}: {reason}")]
    CorruptFile { position: u64, reason: String },

    /// The on-disk record length differs from the size the caller expected.
    #[error("Unexpected document size at position {position}: expected {expected}, stored {stored}")]
    InvalidDataSize {
        position: u64,
        expected: u32,
        stored: u32,
    },

    /// Truncation was requested at a position that is not a record start.
    #[error("Position {position} is not a record boundary")]
    InvalidBoundary { position: u64 },

    /// A mutation was attempted against a closed partition.
    #[error("Partition is not open")]
    NotOpen,

    /// Underlying I/O failure.
    #[error("Partition I/O error: {0}")]
    Io(#[from] std::io::Error),
}
