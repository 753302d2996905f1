//! Append-only fixed-record index
//!
//! An index maps a 1-based slot to a packed [`Entry`] record. The file
//! opens with a validated header whose metadata blob must match the blob
//! supplied at open, binding the index to its semantic owner. Fixed-size
//! records give O(1) random access and branch-free binary search over the
//! monotonic entry numbers.
//!
//! File layout:
//!
//! ```text
//! +------------------+
//! | Magic            | "nesidx01" (8 bytes: 6-byte tag + 2-byte version)
//! +------------------+
//! | Metadata Length  | (u32 BE, includes the terminating newline)
//! +------------------+
//! | Metadata Blob    | (canonical JSON + '\n')
//! +------------------+
//! | Entry Records    | (packed, ENTRY_SIZE bytes each)
//! +------------------+
//! ```
//!
//! Appends are buffered like partition writes; `len()` and all reads
//! include buffered entries. Slot arguments are signed: negative values
//! count from the end (`get(-1)` is the last entry), `0` is never a valid
//! slot.

mod entry;
mod errors;
mod metadata;

pub use entry::{Entry, ENTRY_SIZE};
pub use errors::{IndexError, IndexResult};

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::StorageConfig;

/// Magic bytes opening every index file.
pub const INDEX_MAGIC: &[u8; 8] = b"nesidx01";

/// Length of the fixed header part (magic + metadata length field).
const FIXED_HEADER_SIZE: u64 = 12;

/// Callback invoked with an entry's slot once its bytes are durable.
pub type AddCallback = Box<dyn FnOnce(u64)>;

struct PendingAdd {
    slot: u64,
    callback: AddCallback,
}

/// One append-only fixed-record index file.
pub struct Index {
    /// Path to the index file
    path: PathBuf,
    /// File handle; `None` while closed
    file: Option<File>,
    /// Total header length (fixed part + metadata blob)
    header_len: u64,
    /// Entries durable on disk
    flushed_count: u64,
    /// Buffered, not-yet-durable entry bytes
    buffer: Vec<u8>,
    /// Buffer capacity before a flush is forced
    write_buffer_size: usize,
    /// Idle-flush delay; zero disables idle flushing
    flush_delay: Duration,
    /// When the oldest buffered entry was added
    buffered_since: Option<Instant>,
    /// Completion callbacks for buffered entries
    pending: Vec<PendingAdd>,
    /// Caller-supplied metadata fields, validated against the header
    metadata: Map<String, Value>,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("path", &self.path)
            .field("header_len", &self.header_len)
            .field("flushed_count", &self.flushed_count)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("flush_delay", &self.flush_delay)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl Index {
    /// Create a handle for the index file at `path`. The caller's
    /// metadata fields are written into the header when the file is
    /// created and compared against the stored header on every reopen.
    /// The file is not touched until [`open`](Self::open) is called.
    pub fn new(
        path: impl Into<PathBuf>,
        config: &StorageConfig,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            path: path.into(),
            file: None,
            header_len: 0,
            flushed_count: 0,
            buffer: Vec::new(),
            write_buffer_size: config.write_buffer_size,
            flush_delay: config.flush_delay(),
            buffered_since: None,
            pending: Vec::new(),
            metadata,
        }
    }

    /// Open the index: validate an existing file's header and metadata or
    /// create a fresh file. Opening an already-open index is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidFileHeader` / `InvalidFileVersion` on a foreign or
    /// future-format file, `InvalidMetadataSize` / `InvalidMetadata` /
    /// `MetadataMismatch` / `InvalidEntrySize` on header validation
    /// failures, `FileCorrupt` when the entry body is not a whole number
    /// of records.
    pub fn open(&mut self) -> IndexResult<()> {
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
            let blob = metadata::encode_blob(&self.metadata)?;
            let mut header = Vec::with_capacity(FIXED_HEADER_SIZE as usize + blob.len());
            header.extend_from_slice(INDEX_MAGIC);
            header.extend_from_slice(&(blob.len() as u32).to_be_bytes());
            header.extend_from_slice(&blob);
            file.write_all_at(&header, 0)?;
            file.sync_all()?;
            self.header_len = header.len() as u64;
            self.flushed_count = 0;
            debug!(path = %self.path.display(), "Created index");
        } else {
            self.validate_header(&file, file_len)?;
            debug!(
                path = %self.path.display(),
                entries = self.flushed_count,
                "Opened index"
            );
        }

        self.file = Some(file);
        Ok(())
    }

    fn validate_header(&mut self, file: &File, file_len: u64) -> IndexResult<()> {
        if file_len < INDEX_MAGIC.len() as u64 {
            return Err(IndexError::InvalidFileHeader { found: Vec::new() });
        }
        let mut magic = [0u8; 8];
        file.read_exact_at(&mut magic, 0)?;
        if magic[..6] != INDEX_MAGIC[..6] {
            return Err(IndexError::InvalidFileHeader {
                found: magic.to_vec(),
            });
        }
        if magic[6..8] != INDEX_MAGIC[6..8] {
            return Err(IndexError::InvalidFileVersion {
                found: magic[6..8].to_vec(),
            });
        }

        if file_len < FIXED_HEADER_SIZE {
            return Err(IndexError::InvalidMetadataSize {
                declared: 0,
                file_size: file_len,
            });
        }
        let mut len_raw = [0u8; 4];
        file.read_exact_at(&mut len_raw, 8)?;
        let declared = u32::from_be_bytes(len_raw);
        if FIXED_HEADER_SIZE + declared as u64 > file_len {
            return Err(IndexError::InvalidMetadataSize {
                declared,
                file_size: file_len,
            });
        }

        let mut blob = vec![0u8; declared as usize];
        file.read_exact_at(&mut blob, FIXED_HEADER_SIZE)?;
        let stored = metadata::decode_blob(&blob)?;
        if stored.entry_size != ENTRY_SIZE as u32 {
            return Err(IndexError::InvalidEntrySize {
                stored: stored.entry_size,
                expected: ENTRY_SIZE as u32,
            });
        }
        if stored.custom != self.metadata {
            return Err(IndexError::MetadataMismatch);
        }

        let header_len = FIXED_HEADER_SIZE + declared as u64;
        let body = file_len - header_len;
        if body % ENTRY_SIZE as u64 != 0 {
            return Err(IndexError::FileCorrupt {
                reason: format!(
                    "entry body of {} bytes is not a multiple of {}",
                    body, ENTRY_SIZE
                ),
            });
        }

        self.header_len = header_len;
        self.flushed_count = body / ENTRY_SIZE as u64;
        Ok(())
    }

    /// Whether the index is open.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Path to the index file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Caller-supplied metadata fields this index was opened with.
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Number of entries, including buffered ones.
    pub fn len(&self) -> u64 {
        self.flushed_count + (self.buffer.len() / ENTRY_SIZE) as u64
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an entry at the next slot, returning the assigned 1-based
    /// slot. The entry may still be buffered when this returns.
    ///
    /// # Errors
    ///
    /// `NotOpen` if the index is closed.
    pub fn add(&mut self, entry: Entry) -> IndexResult<u64> {
        self.add_inner(entry, None)
    }

    /// Append an entry and register a callback invoked with the assigned
    /// slot once the enclosing flush has fsync'd it.
    pub fn add_with<F>(&mut self, entry: Entry, on_flush: F) -> IndexResult<u64>
    where
        F: FnOnce(u64) + 'static,
    {
        self.add_inner(entry, Some(Box::new(on_flush)))
    }

    fn add_inner(&mut self, entry: Entry, on_flush: Option<AddCallback>) -> IndexResult<u64> {
        if self.file.is_none() {
            return Err(IndexError::NotOpen);
        }

        let slot = self.len() + 1;
        let raw = entry.encode();

        if ENTRY_SIZE > self.write_buffer_size {
            // Degenerate configuration: every entry is flushed directly.
            self.flush()?;
            let offset = self.entry_offset(slot);
            let file = self.file.as_ref().expect("checked open above");
            let written = file
                .write_all_at(&raw, offset)
                .and_then(|()| file.sync_all());
            if let Err(e) = written {
                return Err(self.poison(e));
            }
            self.flushed_count += 1;
            if let Some(callback) = on_flush {
                callback(slot);
            }
            return Ok(slot);
        }

        if self.buffer.len() + ENTRY_SIZE > self.write_buffer_size {
            self.flush()?;
        }
        if self.buffer.is_empty() {
            self.buffered_since = Some(Instant::now());
        }
        self.buffer.extend_from_slice(&raw);
        if let Some(callback) = on_flush {
            self.pending.push(PendingAdd { slot, callback });
        }

        if !self.flush_delay.is_zero()
            && self
                .buffered_since
                .is_some_and(|since| since.elapsed() >= self.flush_delay)
        {
            self.flush()?;
        }

        Ok(slot)
    }

    /// Fetch the entry at a slot. Negative slots count from the end
    /// (`-1` is the last entry). Returns `Ok(None)` for slot `0`, slots
    /// out of range, or a closed index.
    pub fn get(&self, slot: i64) -> IndexResult<Option<Entry>> {
        if self.file.is_none() {
            return Ok(None);
        }
        let Some(slot) = self.normalize(slot) else {
            return Ok(None);
        };
        let entries = self.read_entries(slot, 1)?;
        Ok(entries.into_iter().next())
    }

    /// Fetch the inclusive slot range `[from, to]`. Negative endpoints
    /// count from the end. Returns `Ok(None)` when either endpoint is out
    /// of range after normalization, when `from > to`, or when the index
    /// is closed.
    pub fn range(&self, from: i64, to: i64) -> IndexResult<Option<Vec<Entry>>> {
        if self.file.is_none() {
            return Ok(None);
        }
        let (Some(from), Some(to)) = (self.normalize(from), self.normalize(to)) else {
            return Ok(None);
        };
        if from > to {
            return Ok(None);
        }
        let entries = self.read_entries(from, (to - from + 1) as usize)?;
        Ok(Some(entries))
    }

    /// Every entry, in slot order: `range(1, len)`.
    pub fn all(&self) -> IndexResult<Option<Vec<Entry>>> {
        self.range(1, self.len() as i64)
    }

    /// The entry at the last slot, or `Ok(None)` when empty.
    pub fn last_entry(&self) -> IndexResult<Option<Entry>> {
        self.get(self.len() as i64)
    }

    /// Binary search over the monotonically non-decreasing entry numbers.
    ///
    /// With `min == false`, returns the largest slot whose number is at
    /// most `target`; with `min == true`, the smallest slot whose number
    /// is at least `target`. Returns `0` when no slot qualifies (or the
    /// index is closed or empty).
    pub fn find(&self, target: u32, min: bool) -> IndexResult<u64> {
        if self.file.is_none() || self.is_empty() {
            return Ok(0);
        }
        let len = self.len();

        if min {
            let last = self.read_entries(len, 1)?[0];
            if last.number < target {
                return Ok(0);
            }
            let (mut lo, mut hi) = (1u64, len);
            while lo < hi {
                let mid = (lo + hi) / 2;
                if self.read_entries(mid, 1)?[0].number >= target {
                    hi = mid;
                } else {
                    lo = mid + 1;
                }
            }
            Ok(lo)
        } else {
            let first = self.read_entries(1, 1)?[0];
            if first.number > target {
                return Ok(0);
            }
            let (mut lo, mut hi) = (1u64, len);
            while lo < hi {
                let mid = (lo + hi + 1) / 2;
                if self.read_entries(mid, 1)?[0].number <= target {
                    lo = mid;
                } else {
                    hi = mid - 1;
                }
            }
            Ok(lo)
        }
    }

    /// Keep slots `1..=after`, dropping the rest. Values at or past the
    /// current length are a no-op; negative values clear the index.
    /// Buffered entries above the cut are discarded with their callbacks.
    pub fn truncate(&mut self, after: i64) -> IndexResult<()> {
        if self.file.is_none() {
            return Err(IndexError::NotOpen);
        }

        let len = self.len();
        let keep = if after < 0 { 0 } else { after as u64 };
        if keep >= len {
            return Ok(());
        }

        if keep <= self.flushed_count {
            let file = self.file.as_ref().expect("checked open above");
            file.set_len(self.header_len + keep * ENTRY_SIZE as u64)?;
            file.sync_all()?;
            self.flushed_count = keep;
            self.buffer.clear();
            self.buffered_since = None;
        } else {
            self.buffer
                .truncate(((keep - self.flushed_count) as usize) * ENTRY_SIZE);
        }
        self.pending.retain(|entry| entry.slot <= keep);

        debug!(path = %self.path.display(), keep, "Truncated index");
        Ok(())
    }

    /// Flush buffered entries and fsync, then fire pending completion
    /// callbacks in append order.
    pub fn flush(&mut self) -> IndexResult<()> {
        if self.file.is_none() {
            return Err(IndexError::NotOpen);
        }

        if !self.buffer.is_empty() {
            let offset = self.entry_offset(self.flushed_count + 1);
            let file = self.file.as_ref().expect("checked open above");
            let written = file
                .write_all_at(&self.buffer, offset)
                .and_then(|()| file.sync_all());
            if let Err(e) = written {
                return Err(self.poison(e));
            }
            self.flushed_count += (self.buffer.len() / ENTRY_SIZE) as u64;
            self.buffer.clear();
        }
        self.buffered_since = None;

        for entry in self.pending.drain(..) {
            (entry.callback)(entry.slot);
        }
        Ok(())
    }

    /// Flush and release the file handle. Closing an already-closed index
    /// is a no-op.
    pub fn close(&mut self) -> IndexResult<()> {
        if self.file.is_none() {
            return Ok(());
        }
        self.flush()?;
        self.file = None;
        debug!(path = %self.path.display(), "Closed index");
        Ok(())
    }

    /// Close without flushing and delete the index file. Pending
    /// completion callbacks are dropped uninvoked.
    pub fn destroy(&mut self) -> IndexResult<()> {
        self.pending.clear();
        self.buffer.clear();
        self.buffered_since = None;
        self.file = None;
        self.flushed_count = 0;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The tail state is unknown after a failed write or fsync: release
    /// the handle so the index reads as closed from here on.
    fn poison(&mut self, e: io::Error) -> IndexError {
        warn!(path = %self.path.display(), error = %e, "Index write failed");
        self.file = None;
        self.buffer.clear();
        self.buffered_since = None;
        self.pending.clear();
        IndexError::Io(e)
    }

    /// Byte offset of a 1-based slot within the file.
    fn entry_offset(&self, slot: u64) -> u64 {
        self.header_len + (slot - 1) * ENTRY_SIZE as u64
    }

    /// Map a signed slot to its 1-based position, or `None` when it does
    /// not address an existing entry.
    pub(crate) fn normalize(&self, slot: i64) -> Option<u64> {
        let len = self.len();
        if slot > 0 {
            (slot as u64 <= len).then_some(slot as u64)
        } else if slot < 0 {
            let back = slot.unsigned_abs();
            (back <= len).then(|| len - back + 1)
        } else {
            None
        }
    }

    /// Read `count` consecutive entries starting at 1-based `first`,
    /// stitching the durable file region and the buffer. Bounds are the
    /// caller's responsibility.
    fn read_entries(&self, first: u64, count: usize) -> IndexResult<Vec<Entry>> {
        let mut raw = vec![0u8; count * ENTRY_SIZE];
        let start = (first - 1) * ENTRY_SIZE as u64;
        let flushed_bytes = self.flushed_count * ENTRY_SIZE as u64;
        let from_file = if start < flushed_bytes {
            (flushed_bytes - start).min(raw.len() as u64) as usize
        } else {
            0
        };

        if from_file > 0 {
            let file = self.file.as_ref().ok_or(IndexError::NotOpen)?;
            file.read_exact_at(&mut raw[..from_file], self.header_len + start)?;
        }
        if from_file < raw.len() {
            let offset = (start + from_file as u64 - flushed_bytes) as usize;
            let rest = raw.len() - from_file;
            raw[from_file..].copy_from_slice(&self.buffer[offset..offset + rest]);
        }

        Ok(raw
            .chunks_exact(ENTRY_SIZE)
            .map(|chunk| {
                let mut record = [0u8; ENTRY_SIZE];
                record.copy_from_slice(chunk);
                Entry::decode(&record)
            })
            .collect())
    }
}
