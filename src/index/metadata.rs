//! Index header metadata blob
//!
//! The index header carries an opaque key/value blob chosen by the caller
//! at create time, typically binding the index to its semantic owner
//! (stream name, matcher fingerprint). The blob is stored as canonical
//! JSON terminated by a newline; the declared length includes the
//! newline. serde_json's sorted-key object map makes the encoding
//! deterministic, so equal inputs produce bit-equal blobs and reopen
//! validation can compare structurally.
//!
//! The record size of the file is carried inside the blob under
//! `entrySize`, so an index written with a different record layout is
//! rejected before any entry is decoded.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::entry::ENTRY_SIZE;
use super::errors::{IndexError, IndexResult};

/// Decoded contents of the metadata blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct HeaderMetadata {
    /// Record size the file was written with
    #[serde(rename = "entrySize")]
    pub entry_size: u32,

    /// Caller-supplied fields, compared verbatim on reopen
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

impl HeaderMetadata {
    pub fn new(custom: Map<String, Value>) -> Self {
        Self {
            entry_size: ENTRY_SIZE as u32,
            custom,
        }
    }
}

/// Encode the blob as it is written into a fresh index header.
pub(crate) fn encode_blob(custom: &Map<String, Value>) -> IndexResult<Vec<u8>> {
    let meta = HeaderMetadata::new(custom.clone());
    let mut blob = serde_json::to_vec(&meta)
        .map_err(|e| IndexError::InvalidMetadata(e.to_string()))?;
    blob.push(b'\n');
    Ok(blob)
}

/// Decode a stored blob, rejecting bytes that are not a newline-terminated
/// JSON object.
pub(crate) fn decode_blob(bytes: &[u8]) -> IndexResult<HeaderMetadata> {
    let Some((&b'\n', body)) = bytes.split_last() else {
        return Err(IndexError::InvalidMetadata(
            "metadata blob is not newline-terminated".to_string(),
        ));
    };
    serde_json::from_slice(body).map_err(|e| IndexError::InvalidMetadata(e.to_string()))
}
