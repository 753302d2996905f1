//! Configuration for an event store instance
//!
//! Centralized configuration with documented defaults. One `StorageConfig`
//! is shared by the partition, every index, and the storage façade.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Map, Value};

/// Default write-buffer capacity for partitions and indexes (16 KiB).
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 16 * 1024;

/// Default idle-flush delay in milliseconds.
pub const DEFAULT_FLUSH_DELAY_MS: u64 = 100;

/// Configuration for a [`Storage`](crate::Storage) instance and its files.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory for all data files. Created if absent.
    pub storage_directory: PathBuf,

    /// Write-buffer capacity in bytes for partition and index appends.
    /// Records larger than the buffer bypass it and are flushed directly.
    pub write_buffer_size: usize,

    /// Whether reads may be served from the not-yet-flushed write buffer.
    /// When disabled, reads into the buffered region report a miss until
    /// the next flush makes the bytes durable.
    pub dirty_reads: bool,

    /// Idle-flush delay in milliseconds. A write that finds buffered bytes
    /// older than this triggers a flush. `0` flushes only when the buffer
    /// fills or the file is closed.
    pub flush_delay_ms: u64,

    /// Opaque key/value blob written into each index header at create
    /// time. Reopening an index compares the stored blob against this one
    /// and fails on mismatch.
    pub metadata: Map<String, Value>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_directory: PathBuf::from("./data"),
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            dirty_reads: true,
            flush_delay_ms: DEFAULT_FLUSH_DELAY_MS,
            metadata: Map::new(),
        }
    }
}

impl StorageConfig {
    /// Config rooted at the given data directory, defaults elsewhere.
    pub fn new(storage_directory: impl Into<PathBuf>) -> Self {
        Self {
            storage_directory: storage_directory.into(),
            ..Self::default()
        }
    }

    /// Set the write-buffer capacity in bytes.
    pub fn with_write_buffer_size(mut self, bytes: usize) -> Self {
        self.write_buffer_size = bytes;
        self
    }

    /// Enable or disable dirty reads.
    pub fn with_dirty_reads(mut self, dirty_reads: bool) -> Self {
        self.dirty_reads = dirty_reads;
        self
    }

    /// Set the idle-flush delay in milliseconds (`0` disables idle flush).
    pub fn with_flush_delay_ms(mut self, millis: u64) -> Self {
        self.flush_delay_ms = millis;
        self
    }

    /// Set the index-header metadata blob.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub(crate) fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }
}
