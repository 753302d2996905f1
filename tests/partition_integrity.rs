//! Partition Integrity Tests
//!
//! End-to-end checks of the partition file format: payloads of every
//! size survive close/reopen byte-for-byte, truncation lands only on
//! record boundaries, and torn tails are detected and recoverable.

use std::fs::OpenOptions;

use eventlog::partition::record;
use eventlog::{Partition, PartitionError, StorageConfig};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn open_partition(dir: &TempDir, config: &StorageConfig) -> Partition {
    let mut partition = Partition::new(dir.path().join("events"), config);
    partition.open().unwrap();
    partition
}

fn reopen_partition(dir: &TempDir, config: &StorageConfig) -> Partition {
    let mut partition = Partition::new(dir.path().join("events"), config);
    partition.open().unwrap();
    partition
}

// =============================================================================
// Round-trips across close/reopen
// =============================================================================

#[test]
fn test_large_payload_with_tiny_buffer() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::new(dir.path()).with_write_buffer_size(64);

    let payload: Vec<u8> = (0..600 * 1024).map(|i| (i % 251) as u8).collect();
    let position;
    {
        let mut partition = open_partition(&dir, &config);
        position = partition.write(&payload).unwrap();
        partition.close().unwrap();
    }

    let partition = reopen_partition(&dir, &config);
    assert_eq!(position, 0);
    assert_eq!(
        partition.read_from(0, None).unwrap().unwrap(),
        payload
    );
}

#[test]
fn test_unicode_payloads_readable_at_returned_positions() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::default();
    let first_text = "foo-üöälß";
    let second_text = "bar-日本語";

    let (first, second);
    {
        let mut partition = open_partition(&dir, &config);
        first = partition.write(first_text.as_bytes()).unwrap();
        second = partition.write(second_text.as_bytes()).unwrap();
        partition.close().unwrap();
    }

    let partition = reopen_partition(&dir, &config);
    let read_first = partition.read_from(first, None).unwrap().unwrap();
    let read_second = partition.read_from(second, None).unwrap().unwrap();
    assert_eq!(String::from_utf8(read_first).unwrap(), first_text);
    assert_eq!(String::from_utf8(read_second).unwrap(), second_text);
}

#[test]
fn test_sizes_around_buffer_capacity() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::new(dir.path()).with_write_buffer_size(64);

    let payloads: Vec<Vec<u8>> = [0usize, 1, 58, 59, 60, 64, 65, 1000]
        .iter()
        .map(|&n| vec![b'x'; n])
        .collect();

    let mut positions = Vec::new();
    {
        let mut partition = open_partition(&dir, &config);
        for payload in &payloads {
            positions.push(partition.write(payload).unwrap());
        }
        partition.close().unwrap();
    }

    let partition = reopen_partition(&dir, &config);
    for (position, payload) in positions.iter().zip(&payloads) {
        assert_eq!(
            partition.read_from(*position, None).unwrap().unwrap(),
            *payload
        );
    }
    assert_eq!(partition.read_all().unwrap(), payloads);
}

// =============================================================================
// Truncation
// =============================================================================

#[test]
fn test_truncate_produces_prefix() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::default();
    let mut partition = open_partition(&dir, &config);

    let mut positions = Vec::new();
    for n in 0..5u8 {
        positions.push(partition.write(&[n; 10]).unwrap());
    }

    partition.truncate(positions[3] as i64).unwrap();
    let remaining = partition.read_all().unwrap();
    assert_eq!(remaining.len(), 3);
    assert_eq!(remaining[2], vec![2u8; 10]);

    // The cut is durable across reopen.
    partition.close().unwrap();
    let partition = reopen_partition(&dir, &config);
    assert_eq!(partition.read_all().unwrap().len(), 3);
}

#[test]
fn test_truncate_rejects_interior_positions() {
    let dir = TempDir::new().unwrap();
    let mut partition = open_partition(&dir, &StorageConfig::default());
    partition.write(b"0123456789").unwrap();
    partition.write(b"abcdefghij").unwrap();

    for bad in [1i64, 7, 14, 16] {
        assert!(matches!(
            partition.truncate(bad).unwrap_err(),
            PartitionError::InvalidBoundary { .. }
        ));
    }
    assert_eq!(partition.read_all().unwrap().len(), 2);
}

// =============================================================================
// Torn writes
// =============================================================================

#[test]
fn test_torn_tail_is_detected_and_recoverable() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::default();
    let (keep, torn);
    {
        let mut partition = open_partition(&dir, &config);
        partition.write(b"first").unwrap();
        keep = partition.write(b"second").unwrap();
        torn = partition.write(b"third-will-be-torn").unwrap();
        partition.close().unwrap();
    }

    // Simulate a crash that persisted only part of the last record.
    let path = dir.path().join("events");
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    let len = file.metadata().unwrap().len();
    file.set_len(len - 9).unwrap();
    drop(file);

    let mut partition = reopen_partition(&dir, &config);

    // Intact records still read; the tear is an explicit error.
    assert_eq!(partition.read_from(keep, None).unwrap().unwrap(), b"second");
    assert!(matches!(
        partition.read_from(torn, None).unwrap_err(),
        PartitionError::CorruptFile { .. }
    ));

    // The caller's recovery: truncate at the tear and resume appending.
    partition.truncate(torn as i64).unwrap();
    let fresh = partition.write(b"fourth").unwrap();
    assert_eq!(fresh, torn);
    assert_eq!(
        partition.read_all().unwrap(),
        vec![b"first".to_vec(), b"second".to_vec(), b"fourth".to_vec()]
    );
}

#[test]
fn test_sequential_scan_reports_tear() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::default();
    {
        let mut partition = open_partition(&dir, &config);
        partition.write(b"alpha").unwrap();
        partition.write(b"beta").unwrap();
        partition.close().unwrap();
    }

    let path = dir.path().join("events");
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    let len = file.metadata().unwrap().len();
    file.set_len(len - 2).unwrap();
    drop(file);

    let partition = reopen_partition(&dir, &config);
    let scanned: Vec<_> = partition.iter().collect();
    assert_eq!(scanned.len(), 2);
    assert_eq!(scanned[0].as_ref().unwrap().1, b"alpha");
    assert!(scanned[1].is_err());
}

// =============================================================================
// Format constants
// =============================================================================

#[test]
fn test_file_starts_with_magic() {
    let dir = TempDir::new().unwrap();
    {
        let mut partition = open_partition(&dir, &StorageConfig::default());
        partition.write(b"doc").unwrap();
        partition.close().unwrap();
    }

    let raw = std::fs::read(dir.path().join("events")).unwrap();
    assert_eq!(&raw[..8], record::PARTITION_MAGIC);
    // u32 BE length prefix, payload, 0x0A trailer.
    assert_eq!(&raw[8..12], &3u32.to_be_bytes());
    assert_eq!(&raw[12..15], b"doc");
    assert_eq!(raw[15], 0x0A);
}
