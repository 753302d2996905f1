//! Storage Dispatch and Stream Tests
//!
//! Cross-component behavior of the façade: writes land in the partition
//! and every matching index, range streams replay them lazily, dirty-read
//! visibility follows configuration, and reopened stores serve identical
//! data.

use serde_json::{json, Value};
use tempfile::TempDir;

use eventlog::{Storage, StorageConfig, StorageError, PRIMARY_INDEX};

// =============================================================================
// Test Utilities
// =============================================================================

fn event(kind: &str, n: i64) -> Value {
    json!({"type": kind, "n": n})
}

fn order_matcher() -> eventlog::Matcher<Value> {
    Box::new(|doc: &Value| doc["type"] == "order")
}

// =============================================================================
// Write dispatch
// =============================================================================

#[test]
fn test_writes_fan_out_to_matching_indexes() {
    let dir = TempDir::new().unwrap();
    let mut storage = Storage::open("shop", StorageConfig::new(dir.path())).unwrap();
    storage.ensure_index("orders", Some(order_matcher())).unwrap();
    storage.ensure_index("everything", None).unwrap();

    storage.write(&event("order", 1)).unwrap();
    storage.write(&event("refund", 2)).unwrap();
    storage.write(&event("order", 3)).unwrap();

    assert_eq!(storage.index_len(PRIMARY_INDEX), Some(3));
    assert_eq!(storage.index_len("everything"), Some(3));
    assert_eq!(storage.index_len("orders"), Some(2));

    // Entries carry per-index sequential numbers but shared positions.
    let orders = storage.lookup_index("orders").unwrap();
    let second = orders.get(2).unwrap().unwrap();
    assert_eq!(second.number, 2);
    assert_eq!(
        storage.read_from(second.position, Some(second.size)).unwrap(),
        Some(event("order", 3))
    );
}

#[test]
fn test_unicode_documents_roundtrip_through_reopen() {
    let dir = TempDir::new().unwrap();
    let first_doc = json!({"text": "foo-üöälß"});
    let second_doc = json!({"text": "bar-日本語"});

    let (first, second);
    {
        let mut storage = Storage::open("shop", StorageConfig::new(dir.path())).unwrap();
        first = storage.write(&first_doc).unwrap();
        second = storage.write(&second_doc).unwrap();
        storage.close().unwrap();
    }

    let storage = Storage::open("shop", StorageConfig::new(dir.path())).unwrap();
    assert_eq!(
        storage.read_from(first.position, Some(first.size)).unwrap(),
        Some(first_doc)
    );
    assert_eq!(
        storage.read_from(second.position, Some(second.size)).unwrap(),
        Some(second_doc)
    );
}

// =============================================================================
// Range streams
// =============================================================================

#[test]
fn test_stream_replays_filtered_history() {
    let dir = TempDir::new().unwrap();
    let mut storage = Storage::open("shop", StorageConfig::new(dir.path())).unwrap();
    storage.ensure_index("orders", Some(order_matcher())).unwrap();

    for n in 1..=6 {
        let kind = if n % 2 == 0 { "refund" } else { "order" };
        storage.write(&event(kind, n)).unwrap();
    }

    let stream = storage.read_range(1, -1, Some("orders")).unwrap().unwrap();
    assert_eq!(stream.len(), 3);
    let docs: Vec<Value> = stream.iter().map(Result::unwrap).collect();
    assert_eq!(docs, vec![event("order", 1), event("order", 3), event("order", 5)]);

    // Lazy view restarts from the top on each iteration.
    let again: Vec<Value> = stream.iter().map(Result::unwrap).collect();
    assert_eq!(docs, again);
}

#[test]
fn test_stream_after_reopen_matches_original() {
    let dir = TempDir::new().unwrap();
    let before: Vec<Value>;
    {
        let mut storage = Storage::open("shop", StorageConfig::new(dir.path())).unwrap();
        for n in 1..=10 {
            storage.write(&event("order", n)).unwrap();
        }
        before = storage
            .read_range(3, 7, None)
            .unwrap()
            .unwrap()
            .iter()
            .map(Result::unwrap)
            .collect();
        storage.close().unwrap();
    }

    let storage = Storage::open("shop", StorageConfig::new(dir.path())).unwrap();
    let after: Vec<Value> = storage
        .read_range(3, 7, None)
        .unwrap()
        .unwrap()
        .iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(before, after);
    assert_eq!(after.len(), 5);
}

// =============================================================================
// Visibility and durability
// =============================================================================

#[test]
fn test_dirty_reads_expose_buffered_writes() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::new(dir.path()).with_flush_delay_ms(0);
    let mut storage = Storage::open("shop", config).unwrap();

    let receipt = storage.write(&event("order", 1)).unwrap();
    // Nothing flushed yet, but the document is already readable.
    assert_eq!(
        storage.read_from(receipt.position, None).unwrap(),
        Some(event("order", 1))
    );
}

#[test]
fn test_disabled_dirty_reads_hide_buffered_writes() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::new(dir.path())
        .with_dirty_reads(false)
        .with_flush_delay_ms(0);
    let mut storage = Storage::open("shop", config).unwrap();

    let receipt = storage.write(&event("order", 1)).unwrap();
    assert_eq!(storage.read_from(receipt.position, None).unwrap(), None);

    storage.flush().unwrap();
    assert_eq!(
        storage.read_from(receipt.position, None).unwrap(),
        Some(event("order", 1))
    );
}

#[test]
fn test_flush_callbacks_fire_in_write_order() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let dir = TempDir::new().unwrap();
    let config = StorageConfig::new(dir.path()).with_flush_delay_ms(0);
    let mut storage = Storage::open("shop", config).unwrap();

    let order = Rc::new(RefCell::new(Vec::new()));
    let mut receipts = Vec::new();
    for n in 1..=3 {
        let sink = Rc::clone(&order);
        let receipt = storage
            .write_with(&event("order", n), move |position| {
                sink.borrow_mut().push(position);
            })
            .unwrap();
        receipts.push(receipt.position);
    }

    assert!(order.borrow().is_empty());
    storage.flush().unwrap();
    assert_eq!(*order.borrow(), receipts);
}

// =============================================================================
// Collaborator contract: optimistic concurrency
// =============================================================================

#[test]
fn test_version_check_guards_stream_commits() {
    let dir = TempDir::new().unwrap();
    let mut storage = Storage::open("shop", StorageConfig::new(dir.path())).unwrap();
    storage.ensure_index("orders", Some(order_matcher())).unwrap();

    storage.write(&event("order", 1)).unwrap();
    let expected = storage.index_len("orders").unwrap();

    // A stream writer validating against the version it read: passes.
    storage.expect_version(Some("orders"), expected).unwrap();

    // A concurrent append invalidates the expectation.
    storage.write(&event("order", 2)).unwrap();
    let err = storage.expect_version(Some("orders"), expected).unwrap_err();
    assert!(matches!(
        err,
        StorageError::OptimisticConcurrency {
            expected: 1,
            actual: 2
        }
    ));
}
