//! Event streams and live subscriptions
//!
//! Two views over the log: [`EventStream`] replays a resolved slot range
//! lazily and restartably, and [`Subscription`] is the live channel fed
//! by [`Storage::write`](super::Storage::write) after the historical data
//! has been drained.

use std::sync::mpsc::{Receiver, TryRecvError};

use crate::index::Entry;

use super::errors::StorageResult;
use super::serializer::Serializer;
use super::Storage;

/// One live write, as delivered to subscribers of an index.
#[derive(Debug, Clone)]
pub struct StreamEvent<D> {
    /// Name of the index this event was appended to
    pub index: String,
    /// Slot the entry was assigned in that index
    pub slot: u64,
    /// The appended index entry
    pub entry: Entry,
    /// The document that was written
    pub document: D,
}

/// Receiving end of an index's live feed.
///
/// Dropping the subscription detaches it; the storage prunes the sender
/// on its next notification.
pub struct Subscription<D> {
    receiver: Receiver<StreamEvent<D>>,
}

impl<D> Subscription<D> {
    pub(crate) fn new(receiver: Receiver<StreamEvent<D>>) -> Self {
        Self { receiver }
    }

    /// The next pending event, if one has been delivered.
    pub fn try_next(&self) -> Option<StreamEvent<D>> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Drain every pending event in delivery order.
    pub fn drain(&self) -> Vec<StreamEvent<D>> {
        let mut events = Vec::new();
        while let Some(event) = self.try_next() {
            events.push(event);
        }
        events
    }
}

/// A lazy, restartable view over a resolved slot range of one index.
///
/// The entries are resolved up front; documents are read from the
/// partition only as the iterator advances. Iterating twice yields the
/// same documents.
pub struct EventStream<'a, S: Serializer> {
    storage: &'a Storage<S>,
    first_slot: u64,
    entries: Vec<Entry>,
}

impl<'a, S: Serializer> std::fmt::Debug for EventStream<'a, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("storage", &self.storage)
            .field("first_slot", &self.first_slot)
            .field("entries", &self.entries)
            .finish()
    }
}

impl<'a, S: Serializer> EventStream<'a, S> {
    pub(crate) fn new(storage: &'a Storage<S>, first_slot: u64, entries: Vec<Entry>) -> Self {
        Self {
            storage,
            first_slot,
            entries,
        }
    }

    /// The index entries backing this view, in slot order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Slot of the first entry in the view.
    pub fn first_slot(&self) -> u64 {
        self.first_slot
    }

    /// Number of entries in the view.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate the documents of the view in slot order. Each call starts
    /// over from the first entry.
    pub fn iter(&self) -> Docs<'_, S> {
        Docs {
            stream: self,
            next: 0,
            done: false,
        }
    }
}

/// Document iterator returned by [`EventStream::iter`].
pub struct Docs<'a, S: Serializer> {
    stream: &'a EventStream<'a, S>,
    next: usize,
    done: bool,
}

impl<S: Serializer> Iterator for Docs<'_, S> {
    type Item = StorageResult<S::Doc>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let entry = self.stream.entries.get(self.next)?;
        self.next += 1;
        match self.stream.storage.resolve_entry(entry) {
            Ok(Some(doc)) => Some(Ok(doc)),
            Ok(None) => {
                // Entry points past the readable partition region (e.g.
                // buffered data with dirty reads disabled).
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
