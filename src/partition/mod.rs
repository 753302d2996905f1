//! Append-only document partition
//!
//! A partition is one append-only log file of opaque, self-delimited
//! payloads. Appends go through an in-memory write buffer whose contents
//! are flushed and fsync'd together; the buffer is a logical extension of
//! the file, so reads can be served from it before the bytes are durable
//! (dirty reads). Every record is wholly in the file or wholly in the
//! buffer — flushes always write the complete buffer.
//!
//! Reads are positioned (`read_from`) or sequential (`iter`). Truncation
//! is only legal on record boundaries and discards buffered bytes above
//! the cut.

mod errors;
pub mod record;

pub use errors::{PartitionError, PartitionResult};

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::StorageConfig;
use record::{HEADER_SIZE, LENGTH_PREFIX_SIZE, TRAILER};

/// Callback invoked with a record's position once its bytes are durable.
pub type FlushCallback = Box<dyn FnOnce(u64)>;

struct PendingFlush {
    position: u64,
    callback: FlushCallback,
}

/// One append-only document log file.
pub struct Partition {
    /// Path to the partition file
    path: PathBuf,
    /// File handle; `None` while closed
    file: Option<File>,
    /// Logical bytes durable on disk (excluding the header)
    flushed_size: u64,
    /// Buffered, not-yet-durable record bytes
    buffer: Vec<u8>,
    /// Buffer capacity before a flush is forced
    write_buffer_size: usize,
    /// Whether reads may be served from the buffer
    dirty_reads: bool,
    /// Idle-flush delay; zero disables idle flushing
    flush_delay: Duration,
    /// When the oldest buffered byte was written
    buffered_since: Option<Instant>,
    /// Completion callbacks for buffered records
    pending: Vec<PendingFlush>,
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("path", &self.path)
            .field("flushed_size", &self.flushed_size)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("dirty_reads", &self.dirty_reads)
            .field("flush_delay", &self.flush_delay)
            .finish_non_exhaustive()
    }
}

impl Partition {
    /// Create a handle for the partition file at `path`. The file is not
    /// touched until [`open`](Self::open) is called.
    pub fn new(path: impl Into<PathBuf>, config: &StorageConfig) -> Self {
        Self {
            path: path.into(),
            file: None,
            flushed_size: 0,
            buffer: Vec::new(),
            write_buffer_size: config.write_buffer_size,
            dirty_reads: config.dirty_reads,
            flush_delay: config.flush_delay(),
            buffered_since: None,
            pending: Vec::new(),
        }
    }

    /// Open the partition: validate the header of an existing file or
    /// create a fresh one. Opening an already-open partition is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidFileHeader` / `InvalidFileVersion` when the file on disk
    /// does not carry the expected magic.
    pub fn open(&mut self) -> PartitionResult<()> {
        if self.file.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let file_len = file.metadata()?.len();
        if file_len == 0 {
            file.write_all_at(record::PARTITION_MAGIC, 0)?;
            file.sync_all()?;
            self.flushed_size = 0;
            debug!(path = %self.path.display(), "Created partition");
        } else {
            if file_len < HEADER_SIZE {
                return Err(PartitionError::InvalidFileHeader { found: Vec::new() });
            }
            let mut header = [0u8; HEADER_SIZE as usize];
            file.read_exact_at(&mut header, 0)?;
            record::validate_magic(&header)?;
            self.flushed_size = file_len - HEADER_SIZE;
            debug!(
                path = %self.path.display(),
                size = self.flushed_size,
                "Opened partition"
            );
        }

        self.file = Some(file);
        Ok(())
    }

    /// Whether the partition is open.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Path to the partition file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical size in bytes: durable content plus buffered content,
    /// excluding the file header.
    pub fn len(&self) -> u64 {
        self.flushed_size + self.buffer.len() as u64
    }

    /// Whether the partition holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a payload, returning the logical position of its record.
    /// The bytes may still be buffered when this returns; use
    /// [`write_with`](Self::write_with) to learn when they are durable.
    ///
    /// # Errors
    ///
    /// `NotOpen` if the partition is closed.
    pub fn write(&mut self, payload: &[u8]) -> PartitionResult<u64> {
        self.write_inner(payload, None)
    }

    /// Append a payload and register a callback invoked with the record's
    /// position once the enclosing flush has fsync'd it.
    pub fn write_with<F>(&mut self, payload: &[u8], on_flush: F) -> PartitionResult<u64>
    where
        F: FnOnce(u64) + 'static,
    {
        self.write_inner(payload, Some(Box::new(on_flush)))
    }

    fn write_inner(
        &mut self,
        payload: &[u8],
        on_flush: Option<FlushCallback>,
    ) -> PartitionResult<u64> {
        if self.file.is_none() {
            return Err(PartitionError::NotOpen);
        }

        let position = self.len();
        let framed = record::encode(payload);

        if framed.len() > self.write_buffer_size {
            // Oversized records bypass the buffer entirely.
            self.flush()?;
            let file = self.file.as_ref().expect("checked open above");
            let written = file
                .write_all_at(&framed, HEADER_SIZE + self.flushed_size)
                .and_then(|()| file.sync_all());
            if let Err(e) = written {
                return Err(self.poison(e));
            }
            self.flushed_size += framed.len() as u64;
            if let Some(callback) = on_flush {
                callback(position);
            }
            return Ok(position);
        }

        if self.buffer.len() + framed.len() > self.write_buffer_size {
            self.flush()?;
        }

        if self.buffer.is_empty() {
            self.buffered_since = Some(Instant::now());
        }
        self.buffer.extend_from_slice(&framed);
        if let Some(callback) = on_flush {
            self.pending.push(PendingFlush { position, callback });
        }

        if !self.flush_delay.is_zero()
            && self
                .buffered_since
                .is_some_and(|since| since.elapsed() >= self.flush_delay)
        {
            self.flush()?;
        }

        Ok(position)
    }

    /// Read the payload of the record starting at `position`.
    ///
    /// Returns `Ok(None)` when the position lies past the end of the
    /// partition, when it falls into the buffered region while dirty reads
    /// are disabled, or when the partition is closed.
    ///
    /// # Errors
    ///
    /// `InvalidDataSize` when `expected_size` differs from the stored
    /// length; `CorruptFile` when the framing at `position` is torn.
    pub fn read_from(
        &self,
        position: u64,
        expected_size: Option<u32>,
    ) -> PartitionResult<Option<Vec<u8>>> {
        if self.file.is_none() {
            return Ok(None);
        }
        if position >= self.len() {
            return Ok(None);
        }
        if position >= self.flushed_size && !self.dirty_reads {
            return Ok(None);
        }

        let visible = if self.dirty_reads {
            self.len()
        } else {
            self.flushed_size
        };

        if position + LENGTH_PREFIX_SIZE as u64 > visible {
            return Err(self.corrupt(position, "record header crosses end of partition"));
        }

        let prefix = self.read_span(position, LENGTH_PREFIX_SIZE)?;
        let stored = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);

        if let Some(expected) = expected_size {
            if expected != stored {
                return Err(PartitionError::InvalidDataSize {
                    position,
                    expected,
                    stored,
                });
            }
        }

        if position + record::framed_len(stored) > visible {
            return Err(self.corrupt(position, "record payload crosses end of partition"));
        }

        let mut body = self.read_span(
            position + LENGTH_PREFIX_SIZE as u64,
            stored as usize + 1,
        )?;
        let trailer = body.pop().expect("span includes trailer byte");
        if trailer != TRAILER {
            return Err(self.corrupt(position, "record trailer byte missing"));
        }

        Ok(Some(body))
    }

    /// Lazy sequential scan over `(position, payload)` pairs in write
    /// order. Restartable: a new iterator replays from the first record.
    pub fn iter(&self) -> PartitionIter<'_> {
        PartitionIter {
            partition: self,
            position: 0,
            done: false,
        }
    }

    /// Read every payload in write order.
    pub fn read_all(&self) -> PartitionResult<Vec<Vec<u8>>> {
        self.iter()
            .map(|item| item.map(|(_, payload)| payload))
            .collect()
    }

    /// Truncate the partition at `position`.
    ///
    /// Positions at or past the end are a no-op; negative positions drop
    /// all content while preserving the header; anything else must be the
    /// exact start of an existing record. Buffered bytes above the cut are
    /// discarded along with their completion callbacks.
    ///
    /// # Errors
    ///
    /// `InvalidBoundary` when `position` is inside a record.
    pub fn truncate(&mut self, position: i64) -> PartitionResult<()> {
        if self.file.is_none() {
            return Err(PartitionError::NotOpen);
        }

        let total = self.len();
        if position >= 0 && position as u64 >= total {
            return Ok(());
        }
        let target = if position < 0 { 0 } else { position as u64 };

        // The cut must land exactly on a record start.
        let mut cursor = 0u64;
        while cursor < target {
            if cursor + LENGTH_PREFIX_SIZE as u64 > total {
                return Err(PartitionError::InvalidBoundary { position: target });
            }
            let prefix = self.read_span(cursor, LENGTH_PREFIX_SIZE)?;
            let stored = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
            cursor += record::framed_len(stored);
        }
        if cursor != target {
            return Err(PartitionError::InvalidBoundary { position: target });
        }

        if target <= self.flushed_size {
            let file = self.file.as_ref().expect("checked open above");
            file.set_len(HEADER_SIZE + target)?;
            file.sync_all()?;
            self.flushed_size = target;
            self.buffer.clear();
            self.buffered_since = None;
        } else {
            self.buffer.truncate((target - self.flushed_size) as usize);
        }
        self.pending.retain(|entry| entry.position < target);

        debug!(path = %self.path.display(), position = target, "Truncated partition");
        Ok(())
    }

    /// Flush the write buffer and fsync, then fire pending completion
    /// callbacks in write order.
    pub fn flush(&mut self) -> PartitionResult<()> {
        let file = self.file.as_ref().ok_or(PartitionError::NotOpen)?;

        if !self.buffer.is_empty() {
            let written = file
                .write_all_at(&self.buffer, HEADER_SIZE + self.flushed_size)
                .and_then(|()| file.sync_all());
            if let Err(e) = written {
                return Err(self.poison(e));
            }
            self.flushed_size += self.buffer.len() as u64;
            self.buffer.clear();
        }
        self.buffered_since = None;

        for entry in self.pending.drain(..) {
            (entry.callback)(entry.position);
        }
        Ok(())
    }

    /// Flush and release the file handle. Closing an already-closed
    /// partition is a no-op.
    pub fn close(&mut self) -> PartitionResult<()> {
        if self.file.is_none() {
            return Ok(());
        }
        self.flush()?;
        self.file = None;
        debug!(path = %self.path.display(), "Closed partition");
        Ok(())
    }

    /// Close without flushing and delete the partition file. Pending
    /// completion callbacks are dropped uninvoked.
    pub fn destroy(&mut self) -> PartitionResult<()> {
        self.pending.clear();
        self.buffer.clear();
        self.buffered_since = None;
        self.file = None;
        self.flushed_size = 0;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read `len` bytes starting at logical `position`, stitching the
    /// durable file region and the write buffer as needed. Bounds are the
    /// caller's responsibility.
    fn read_span(&self, position: u64, len: usize) -> PartitionResult<Vec<u8>> {
        let mut out = vec![0u8; len];
        let from_file = if position < self.flushed_size {
            (self.flushed_size - position).min(len as u64) as usize
        } else {
            0
        };

        if from_file > 0 {
            let file = self.file.as_ref().ok_or(PartitionError::NotOpen)?;
            file.read_exact_at(&mut out[..from_file], HEADER_SIZE + position)?;
        }
        if from_file < len {
            let start = (position + from_file as u64 - self.flushed_size) as usize;
            out[from_file..].copy_from_slice(&self.buffer[start..start + len - from_file]);
        }
        Ok(out)
    }

    /// The tail state is unknown after a failed write or fsync: release
    /// the handle so the partition reads as closed from here on.
    fn poison(&mut self, e: io::Error) -> PartitionError {
        warn!(path = %self.path.display(), error = %e, "Partition write failed");
        self.file = None;
        self.buffer.clear();
        self.buffered_since = None;
        self.pending.clear();
        PartitionError::Io(e)
    }

    fn corrupt(&self, position: u64, reason: &str) -> PartitionError {
        warn!(
            path = %self.path.display(),
            position,
            reason,
            "Partition corruption detected"
        );
        PartitionError::CorruptFile {
            position,
            reason: reason.to_string(),
        }
    }
}

/// Sequential record iterator returned by [`Partition::iter`].
pub struct PartitionIter<'a> {
    partition: &'a Partition,
    position: u64,
    done: bool,
}

impl Iterator for PartitionIter<'_> {
    type Item = PartitionResult<(u64, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.partition.read_from(self.position, None) {
            Ok(Some(payload)) => {
                let position = self.position;
                self.position += record::framed_len(payload.len() as u32);
                Some(Ok((position, payload)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
