//! Durable tailing consumers
//!
//! A consumer is a durable cursor over one index: it remembers the last
//! slot it processed in a sidecar state file, catches up synchronously
//! from that position when started, then follows new writes through the
//! storage's live subscription. Stopping keeps the position; a later
//! start (or a fresh process) resumes where processing left off.

mod errors;
mod state;

pub use errors::{ConsumerError, ConsumerResult};
pub use state::ConsumerState;

use std::path::PathBuf;

use tracing::debug;

use crate::storage::{Serializer, Storage, Subscription};

/// A durable tailing cursor over one index of a storage.
pub struct Consumer<D> {
    /// Consumer identity within its index
    name: String,
    /// Index this consumer follows
    index_name: String,
    /// Path of the sidecar state file
    state_path: PathBuf,
    /// Last processed 1-based slot
    position: u64,
    /// Whether historical entries have been drained since the last start
    caught_up: bool,
    /// Live feed; present while the consumer is started
    subscription: Option<Subscription<D>>,
}

impl<D: Clone> Consumer<D> {
    /// Create a consumer named `consumer_name` on `index_name`, resuming
    /// from the state file in `directory` when one exists.
    pub fn new(
        directory: impl Into<PathBuf>,
        index_name: &str,
        consumer_name: &str,
    ) -> ConsumerResult<Self> {
        let state_path = directory
            .into()
            .join(format!("{index_name}.{consumer_name}.consumer"));
        let position = ConsumerState::load(&state_path)?
            .map(|state| state.position)
            .unwrap_or(0);

        Ok(Self {
            name: consumer_name.to_string(),
            index_name: index_name.to_string(),
            state_path,
            position,
            caught_up: false,
            subscription: None,
        })
    }

    /// Start the consumer: subscribe to the index's live feed, then drain
    /// and return everything between the persisted position and the
    /// current index length. The position advances past the drained
    /// entries and is persisted once for the whole batch.
    ///
    /// Starting an already-started consumer is a no-op that returns no
    /// documents.
    pub fn start<S>(&mut self, storage: &mut Storage<S>) -> ConsumerResult<Vec<D>>
    where
        S: Serializer<Doc = D>,
    {
        if self.subscription.is_some() {
            return Ok(Vec::new());
        }

        // Subscribe first: writes cannot interleave, so everything past
        // `len` arrives over the channel and nothing is missed.
        let subscription = storage.subscribe(Some(&self.index_name))?;
        let len = storage.index_len(&self.index_name).unwrap_or(0);

        let mut documents = Vec::new();
        if len > self.position {
            let stream =
                storage.read_range((self.position + 1) as i64, len as i64, Some(&self.index_name))?;
            if let Some(stream) = stream {
                for doc in stream.iter() {
                    documents.push(doc?);
                }
            }
            if !documents.is_empty() {
                self.position += documents.len() as u64;
                self.persist()?;
            }
        }

        self.caught_up = true;
        self.subscription = Some(subscription);
        debug!(
            consumer = %self.name,
            index = %self.index_name,
            position = self.position,
            "Consumer caught up"
        );
        Ok(documents)
    }

    /// Drain the live feed, returning the new documents in write order.
    /// Slots at or below the current position are skipped. The position
    /// is persisted once per non-empty batch.
    ///
    /// Returns nothing when the consumer is stopped.
    pub fn poll(&mut self) -> ConsumerResult<Vec<D>> {
        let Some(subscription) = &self.subscription else {
            return Ok(Vec::new());
        };

        let mut documents = Vec::new();
        let mut last = self.position;
        for event in subscription.drain() {
            if event.slot > last {
                last = event.slot;
                documents.push(event.document);
            }
        }
        if last != self.position {
            self.position = last;
            self.persist()?;
        }
        Ok(documents)
    }

    /// Suspend the consumer without losing its position.
    pub fn stop(&mut self) {
        if self.subscription.take().is_some() {
            debug!(consumer = %self.name, position = self.position, "Consumer stopped");
        }
        self.caught_up = false;
    }

    /// Rewind to the beginning and persist the rewound position.
    pub fn reset(&mut self) -> ConsumerResult<()> {
        self.stop();
        self.position = 0;
        self.persist()
    }

    /// Consumer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index this consumer follows.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Last processed 1-based slot (`0` before any processing).
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether the consumer is started.
    pub fn is_running(&self) -> bool {
        self.subscription.is_some()
    }

    /// Whether historical entries have been drained since the last start.
    pub fn is_caught_up(&self) -> bool {
        self.caught_up
    }

    fn persist(&self) -> ConsumerResult<()> {
        ConsumerState::new(&self.index_name, &self.name, self.position).save(&self.state_path)
    }
}
