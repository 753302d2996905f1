//! Storage façade
//!
//! A `Storage` binds one partition to a family of matcher-filtered
//! indexes and dispatches every write: the document lands in the
//! partition, then an entry referencing it is appended to the primary
//! index and to every secondary index whose matcher accepts the document.
//! Readers resolve entries back through the partition, either one at a
//! time (`read_from`) or as lazy range streams (`read_range`). Live
//! subscribers receive each write over a typed channel as it happens.
//!
//! The core assumes a single writer; reads and writes interleave on one
//! logical thread.

mod errors;
mod serializer;
mod stream;

pub use errors::{StorageError, StorageResult};
pub use serializer::{JsonSerializer, Serializer};
pub use stream::{Docs, EventStream, StreamEvent, Subscription};

use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};

use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::index::{Entry, Index};
use crate::partition::{FlushCallback, Partition};

/// Reserved name addressing the always-present primary index.
pub const PRIMARY_INDEX: &str = "primary";

/// Identifier of the single partition a storage writes into.
const PARTITION_ID: u32 = 0;

/// Predicate deciding whether a secondary index receives a document.
/// A matcher that panics aborts only its own index's append for that
/// write; the partition and every other index are unaffected.
pub type Matcher<D> = Box<dyn Fn(&D) -> bool>;

/// Where a written document landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReceipt {
    /// Record position in the partition
    pub position: u64,
    /// Encoded document size in bytes
    pub size: u32,
}

struct SecondaryIndex<D> {
    index: Index,
    matcher: Option<Matcher<D>>,
}

impl<D> std::fmt::Debug for SecondaryIndex<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryIndex")
            .field("index", &self.index)
            .field("matcher", &self.matcher.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// One event store: a partition, its indexes, and their live subscribers.
pub struct Storage<S: Serializer = JsonSerializer> {
    /// Store name; also the partition file name
    name: String,
    /// Shared configuration
    config: StorageConfig,
    /// Document codec
    serializer: S,
    /// The single partition, id 0
    partition: Partition,
    /// Primary index; receives an entry for every document
    primary: Index,
    /// Named secondary indexes with their in-memory matchers
    secondary: HashMap<String, SecondaryIndex<S::Doc>>,
    /// Live subscribers per index name, pruned on disconnect
    subscribers: HashMap<String, Vec<Sender<StreamEvent<S::Doc>>>>,
}

impl<S: Serializer> std::fmt::Debug for Storage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("partition", &self.partition)
            .field("primary", &self.primary)
            .field("secondary", &self.secondary)
            .finish_non_exhaustive()
    }
}

impl Storage<JsonSerializer> {
    /// Open a store of JSON documents under `config.storage_directory`.
    pub fn open(name: &str, config: StorageConfig) -> StorageResult<Self> {
        Self::open_with(name, config, JsonSerializer)
    }
}

impl<S: Serializer> Storage<S> {
    /// Open a store with a caller-supplied document serializer.
    ///
    /// Creates the storage directory if absent, then opens (or creates)
    /// the partition file `<name>` and the primary index `<name>.index`.
    pub fn open_with(name: &str, config: StorageConfig, serializer: S) -> StorageResult<Self> {
        fs::create_dir_all(&config.storage_directory)?;

        let mut partition = Partition::new(config.storage_directory.join(name), &config);
        partition.open()?;

        let mut primary = Index::new(
            config.storage_directory.join(format!("{name}.index")),
            &config,
            config.metadata.clone(),
        );
        primary.open()?;

        info!(
            store = name,
            directory = %config.storage_directory.display(),
            documents = primary.len(),
            "Opened storage"
        );

        Ok(Self {
            name: name.to_string(),
            config,
            serializer,
            partition,
            primary,
            secondary: HashMap::new(),
            subscribers: HashMap::new(),
        })
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the store is open for reads and writes.
    pub fn is_open(&self) -> bool {
        self.partition.is_open()
    }

    /// Open or create the secondary index `name` (file
    /// `<store>.<name>.index`) and attach `matcher` in memory. The
    /// matcher is never persisted; callers reproduce it on every reopen
    /// and may record a fingerprint in the configured metadata to guard
    /// against drift.
    ///
    /// # Errors
    ///
    /// `ReservedIndexName` for the primary index name; index header
    /// validation errors when the existing file does not match.
    pub fn ensure_index(
        &mut self,
        name: &str,
        matcher: Option<Matcher<S::Doc>>,
    ) -> StorageResult<&Index> {
        if name == PRIMARY_INDEX {
            return Err(StorageError::ReservedIndexName(name.to_string()));
        }

        match self.secondary.get_mut(name) {
            Some(stored) => {
                if matcher.is_some() {
                    stored.matcher = matcher;
                }
            }
            None => {
                let mut index = Index::new(
                    self.config
                        .storage_directory
                        .join(format!("{}.{}.index", self.name, name)),
                    &self.config,
                    self.config.metadata.clone(),
                );
                index.open()?;
                debug!(store = %self.name, index = name, "Attached secondary index");
                self.secondary
                    .insert(name.to_string(), SecondaryIndex { index, matcher });
            }
        }

        Ok(&self
            .secondary
            .get(name)
            .expect("index inserted above")
            .index)
    }

    /// Write a document: append it to the partition, then index it in
    /// the primary index and in every secondary index whose matcher
    /// accepts it, notifying live subscribers of each receiving index.
    ///
    /// The receipt's position may still be buffered when this returns;
    /// use [`write_with`](Self::write_with) to learn when it is durable.
    pub fn write(&mut self, doc: &S::Doc) -> StorageResult<WriteReceipt>
    where
        S::Doc: Clone,
    {
        self.write_inner(doc, None)
    }

    /// [`write`](Self::write) plus a callback invoked with the record's
    /// partition position once the enclosing flush has fsync'd it.
    pub fn write_with<F>(&mut self, doc: &S::Doc, on_flush: F) -> StorageResult<WriteReceipt>
    where
        F: FnOnce(u64) + 'static,
        S::Doc: Clone,
    {
        self.write_inner(doc, Some(Box::new(on_flush)))
    }

    fn write_inner(
        &mut self,
        doc: &S::Doc,
        on_flush: Option<FlushCallback>,
    ) -> StorageResult<WriteReceipt>
    where
        S::Doc: Clone,
    {
        if !self.partition.is_open() {
            return Err(StorageError::NotOpen);
        }

        let bytes = self.serializer.encode(doc)?;
        let size = bytes.len() as u32;
        let position = match on_flush {
            Some(callback) => self.partition.write_with(&bytes, callback)?,
            None => self.partition.write(&bytes)?,
        };

        let number = (self.primary.len() + 1) as u32;
        let entry = Entry::new(number, position, size, PARTITION_ID);
        let slot = self.primary.add(entry)?;
        self.notify(PRIMARY_INDEX, slot, entry, doc);

        let mut appended = Vec::new();
        for (name, stored) in self.secondary.iter_mut() {
            let accepted = match stored.matcher.as_ref() {
                // A panicking matcher aborts this index's append only;
                // the partition write stands and the remaining indexes
                // still receive their entries.
                Some(matches) => match panic::catch_unwind(AssertUnwindSafe(|| matches(doc))) {
                    Ok(accepted) => accepted,
                    Err(_) => {
                        warn!(store = %self.name, index = %name, "Matcher panicked; index skipped");
                        continue;
                    }
                },
                None => true,
            };
            if accepted {
                let number = (stored.index.len() + 1) as u32;
                let entry = Entry::new(number, position, size, PARTITION_ID);
                let slot = stored.index.add(entry)?;
                appended.push((name.clone(), slot, entry));
            }
        }
        for (name, slot, entry) in appended {
            self.notify(&name, slot, entry, doc);
        }

        Ok(WriteReceipt { position, size })
    }

    /// Read and decode the document at a partition position. `Ok(None)`
    /// for positions past the end or not yet visible.
    pub fn read_from(
        &self,
        position: u64,
        expected_size: Option<u32>,
    ) -> StorageResult<Option<S::Doc>> {
        match self.partition.read_from(position, expected_size)? {
            Some(bytes) => Ok(Some(self.serializer.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Resolve the inclusive slot range `[from, to]` of an index
    /// (`None` = the primary index) into a lazy, restartable stream of
    /// documents. `Ok(None)` when the range does not normalize.
    pub fn read_range(
        &self,
        from: i64,
        to: i64,
        index: Option<&str>,
    ) -> StorageResult<Option<EventStream<'_, S>>> {
        let idx = self.resolve_index(index)?;
        match idx.range(from, to)? {
            Some(entries) => {
                let first = idx.normalize(from).unwrap_or(1);
                Ok(Some(EventStream::new(self, first, entries)))
            }
            None => Ok(None),
        }
    }

    /// Subscribe to live writes reaching an index (`None` = the primary
    /// index). Events already written are not replayed; pair with
    /// [`read_range`](Self::read_range) to catch up first.
    pub fn subscribe(&mut self, index: Option<&str>) -> StorageResult<Subscription<S::Doc>> {
        let name = index.unwrap_or(PRIMARY_INDEX);
        if self.lookup_index(name).is_none() {
            return Err(StorageError::UnknownIndex(name.to_string()));
        }
        let (sender, receiver) = mpsc::channel();
        self.subscribers
            .entry(name.to_string())
            .or_default()
            .push(sender);
        Ok(Subscription::new(receiver))
    }

    /// The index registered under `name`, the primary index included.
    pub fn lookup_index(&self, name: &str) -> Option<&Index> {
        if name == PRIMARY_INDEX {
            Some(&self.primary)
        } else {
            self.secondary.get(name).map(|stored| &stored.index)
        }
    }

    /// Current length (version) of an index, the primary included.
    pub fn index_len(&self, name: &str) -> Option<u64> {
        self.lookup_index(name).map(Index::len)
    }

    /// Fail with `OptimisticConcurrency` unless an index's length equals
    /// the version the caller expects. Stream-level writers call this
    /// before committing.
    pub fn expect_version(&self, index: Option<&str>, expected: u64) -> StorageResult<()> {
        let actual = self.resolve_index(index)?.len();
        if actual != expected {
            return Err(StorageError::OptimisticConcurrency { expected, actual });
        }
        Ok(())
    }

    /// Flush the partition, then every index.
    pub fn flush(&mut self) -> StorageResult<()> {
        self.partition.flush()?;
        self.primary.flush()?;
        for stored in self.secondary.values_mut() {
            stored.index.flush()?;
        }
        Ok(())
    }

    /// Flush and close every index, then the partition. Closing an
    /// already-closed storage is a no-op.
    pub fn close(&mut self) -> StorageResult<()> {
        for stored in self.secondary.values_mut() {
            stored.index.close()?;
        }
        self.primary.close()?;
        self.partition.close()?;
        debug!(store = %self.name, "Closed storage");
        Ok(())
    }

    /// Delete every file of this store: secondary indexes, the primary
    /// index, and the partition. Subscribers are disconnected.
    pub fn destroy(&mut self) -> StorageResult<()> {
        self.subscribers.clear();
        for stored in self.secondary.values_mut() {
            stored.index.destroy()?;
        }
        self.secondary.clear();
        self.primary.destroy()?;
        self.partition.destroy()?;
        info!(store = %self.name, "Destroyed storage");
        Ok(())
    }

    pub(crate) fn resolve_entry(&self, entry: &Entry) -> StorageResult<Option<S::Doc>> {
        self.read_from(entry.position, Some(entry.size))
    }

    fn resolve_index(&self, name: Option<&str>) -> StorageResult<&Index> {
        let name = name.unwrap_or(PRIMARY_INDEX);
        self.lookup_index(name)
            .ok_or_else(|| StorageError::UnknownIndex(name.to_string()))
    }

    fn notify(&mut self, index: &str, slot: u64, entry: Entry, doc: &S::Doc)
    where
        S::Doc: Clone,
    {
        let Some(senders) = self.subscribers.get_mut(index) else {
            return;
        };
        senders.retain(|sender| {
            sender
                .send(StreamEvent {
                    index: index.to_string(),
                    slot,
                    entry,
                    document: doc.clone(),
                })
                .is_ok()
        });
        if senders.is_empty() {
            self.subscribers.remove(index);
        }
    }
}
