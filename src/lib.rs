//! eventlog - embedded append-only event storage
//!
//! Documents are appended to partition files and referenced by
//! fixed-record index files; on top of that substrate sit filtered,
//! ordered event streams and durable consumers that resume from their
//! last acknowledged position.
//!
//! # Components
//!
//! - [`Partition`] — one append-only document log file
//! - [`Index`] — one append-only fixed-record file mapping slots to
//!   [`Entry`] references
//! - [`Storage`] — binds a partition to matcher-filtered indexes and
//!   provides range reads and live subscriptions
//! - [`Consumer`] — durable tailing cursor over one index

pub mod config;
pub mod consumer;
pub mod index;
pub mod partition;
pub mod storage;

pub use config::StorageConfig;
pub use consumer::{Consumer, ConsumerError, ConsumerResult, ConsumerState};
pub use index::{Entry, Index, IndexError, IndexResult, ENTRY_SIZE};
pub use partition::{Partition, PartitionError, PartitionResult};
pub use storage::{
    EventStream, JsonSerializer, Matcher, Serializer, Storage, StorageError, StorageResult,
    StreamEvent, Subscription, WriteReceipt, PRIMARY_INDEX,
};
