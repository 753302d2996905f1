//! Partition record framing
//!
//! On-disk layout of a partition file:
//!
//! ```text
//! +------------------+
//! | Magic            | "nesprt01" (8 bytes: 6-byte tag + 2-byte version)
//! +------------------+
//! | Record 0         |
//! | Record 1         |
//! | ...              |
//! +------------------+
//! ```
//!
//! Each record:
//!
//! ```text
//! +------------------+
//! | Payload Length   | (u32 BE)
//! +------------------+
//! | Payload          | (length bytes, opaque)
//! +------------------+
//! | Trailer          | (1 byte, 0x0A)
//! +------------------+
//! ```
//!
//! The trailer is the framing witness: a record whose declared length does
//! not land on a trailer byte followed by another record boundary (or end
//! of file) was torn mid-write.
//!
//! All integer fields in this file are big-endian. Positions handed out by
//! the partition are logical: byte offsets relative to the end of the
//! 8-byte header, so the first record sits at position 0.

use super::errors::{PartitionError, PartitionResult};

/// Magic bytes opening every partition file.
pub const PARTITION_MAGIC: &[u8; 8] = b"nesprt01";

/// Length of the file header (the magic).
pub const HEADER_SIZE: u64 = 8;

/// Length of the big-endian payload-length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Record trailer byte.
pub const TRAILER: u8 = 0x0A;

/// Framing overhead per record (length prefix + trailer).
pub const RECORD_OVERHEAD: u64 = LENGTH_PREFIX_SIZE as u64 + 1;

/// Encode a payload into a framed record.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len() + 1);
    record.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    record.extend_from_slice(payload);
    record.push(TRAILER);
    record
}

/// Total on-disk length of the record framing a payload of `len` bytes.
pub fn framed_len(len: u32) -> u64 {
    len as u64 + RECORD_OVERHEAD
}

/// Validate the 8-byte header of an existing partition file.
pub fn validate_magic(header: &[u8]) -> PartitionResult<()> {
    if header.len() < PARTITION_MAGIC.len() || header[..6] != PARTITION_MAGIC[..6] {
        return Err(PartitionError::InvalidFileHeader {
            found: header.to_vec(),
        });
    }
    if header[6..8] != PARTITION_MAGIC[6..8] {
        return Err(PartitionError::InvalidFileVersion {
            found: header[6..8].to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frames_payload() {
        let record = encode(b"hello");
        assert_eq!(&record[..4], &5u32.to_be_bytes());
        assert_eq!(&record[4..9], b"hello");
        assert_eq!(record[9], TRAILER);
        assert_eq!(record.len() as u64, framed_len(5));
    }

    #[test]
    fn test_encode_empty_payload() {
        let record = encode(b"");
        assert_eq!(record, vec![0, 0, 0, 0, TRAILER]);
    }

    #[test]
    fn test_validate_magic_accepts_current_format() {
        assert!(validate_magic(PARTITION_MAGIC).is_ok());
    }

    #[test]
    fn test_validate_magic_rejects_foreign_file() {
        let err = validate_magic(b"nesidx01").unwrap_err();
        assert!(matches!(err, PartitionError::InvalidFileHeader { .. }));
    }

    #[test]
    fn test_validate_magic_rejects_future_version() {
        let err = validate_magic(b"nesprt02").unwrap_err();
        assert!(matches!(err, PartitionError::InvalidFileVersion { .. }));
    }
}
