//! Index error types
//!
//! Open-time validation failures carry the specific reason the file was
//! rejected; queries for absent slots are `Ok(None)`, never errors.

use thiserror::Error;

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors raised by index operations
#[derive(Debug, Error)]
pub enum IndexError {
    /// The first header bytes do not spell the index magic.
    #[error("Invalid index file header: expected \"nesidx\", got {found:?}")]
    InvalidFileHeader { found: Vec<u8> },

    /// The magic matched but the version suffix is unsupported.
    #[error("Unsupported index file version: {found:?}")]
    InvalidFileVersion { found: Vec<u8> },

    /// The declared metadata length is inconsistent with the file length.
    #[error("Declared metadata length {declared} does not fit file of {file_size} bytes")]
    InvalidMetadataSize { declared: u32, file_size: u64 },

    /// The stored metadata bytes do not decode as a metadata blob.
    #[error("Invalid index metadata: {0}")]
    InvalidMetadata(String),

    /// The stored metadata blob differs from the one supplied at open.
    #[error("Index metadata does not match the metadata supplied at open")]
    MetadataMismatch,

    /// The stored entry size differs from this build's record size.
    #[error("Index declares {stored}-byte entries, this build uses {expected}-byte entries")]
    InvalidEntrySize { stored: u32, expected: u32 },

    /// The entry body length is not a multiple of the entry size.
    #[error("Corrupt index file: {reason}")]
    FileCorrupt { reason: String },

    /// A mutation was attempted against a closed index.
    #[error("Index is not open")]
    NotOpen,

    /// Underlying I/O failure.
    #[error("Index I/O error: {0}")]
    Io(#[from] std::io::Error),
}
