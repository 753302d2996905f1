//! Consumer sidecar state file
//!
//! Each durable consumer persists its last processed slot in a small
//! JSON file keyed by `(index name, consumer name)`. The state is
//! written to a sibling temp file, fsync'd, then renamed into place, so
//! a crash either keeps the previous position or the new one, never a
//! torn mixture.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::errors::{ConsumerError, ConsumerResult};

/// Persisted position of one consumer on one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerState {
    /// Index the consumer follows
    pub index_name: String,
    /// Consumer identity within that index
    pub consumer_name: String,
    /// Last processed 1-based slot; `0` means nothing processed yet
    pub position: u64,
    /// RFC3339 timestamp of the last persist
    pub updated_at: String,
}

impl ConsumerState {
    /// Fresh state for the given identity and position.
    pub fn new(index_name: &str, consumer_name: &str, position: u64) -> Self {
        Self {
            index_name: index_name.to_string(),
            consumer_name: consumer_name.to_string(),
            position,
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    /// Load the state at `path`, or `Ok(None)` when no file exists yet.
    pub fn load(path: &Path) -> ConsumerResult<Option<Self>> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_slice(&raw)
            .map_err(|e| ConsumerError::InvalidState(e.to_string()))?;
        Ok(Some(state))
    }

    /// Write the state to `path`: a sibling temp file is written and
    /// fsync'd, then renamed over the previous state.
    pub fn save(&self, path: &Path) -> ConsumerResult<()> {
        let json = serde_json::to_vec(self)
            .map_err(|e| ConsumerError::InvalidState(e.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut file = File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, path)?;

        // Make the rename itself durable.
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let loaded = ConsumerState::load(&dir.path().join("absent.consumer")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("orders.billing.consumer");

        let state = ConsumerState::new("orders", "billing", 17);
        state.save(&path).unwrap();

        let loaded = ConsumerState::load(&path).unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.position, 17);

        // The temp file was renamed away, not left behind.
        assert!(!dir.path().join("orders.billing.consumer.tmp").exists());
    }

    #[test]
    fn test_save_replaces_previous_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("orders.billing.consumer");

        ConsumerState::new("orders", "billing", 3).save(&path).unwrap();
        ConsumerState::new("orders", "billing", 9).save(&path).unwrap();

        let loaded = ConsumerState::load(&path).unwrap().unwrap();
        assert_eq!(loaded.position, 9);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("orders.billing.consumer");
        fs::write(&path, b"not json at all").unwrap();

        assert!(matches!(
            ConsumerState::load(&path).unwrap_err(),
            ConsumerError::InvalidState(_)
        ));
    }
}
