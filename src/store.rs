//! Document store contract
//!
//! The coordinator never reaches into a storage engine; it executes task
//! payloads against this record-level trait and clears the first-level cache
//! at every receive-execute boundary. [`MemoryStore`] is the in-process
//! implementation used by the demo binary and the test clusters.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::common::{Error, Result};

/// A record with its monotonically increasing version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub version: u64,
    pub content: Value,
}

/// Record-level contract the replication tasks execute against.
pub trait DocumentStore: Send + Sync {
    /// Database name this store backs
    fn name(&self) -> &str;

    fn read(&self, rid: &str) -> Result<Option<VersionedRecord>>;

    /// Create a record; fails if `rid` already exists. Returns the assigned version.
    fn create(&self, rid: &str, content: Value) -> Result<u64>;

    /// Update a record, optionally checking the expected version first.
    /// Returns the new version.
    fn update(&self, rid: &str, content: Value, expected_version: Option<u64>) -> Result<u64>;

    /// Delete a record, optionally checking the expected version first.
    /// Returns whether a record was removed.
    fn delete(&self, rid: &str, expected_version: Option<u64>) -> Result<bool>;

    /// Overwrite a record at an exact version, creating it if missing.
    /// This is the conflict-fix path: no version check, no version bump.
    fn force_save(&self, rid: &str, content: Value, version: u64) -> Result<()>;

    /// Drop the first-level cache so the next request starts read-through.
    fn clear_cache(&self);
}

/// In-memory document store
pub struct MemoryStore {
    name: String,
    records: Mutex<HashMap<String, VersionedRecord>>,
    cache_clears: AtomicU64,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(HashMap::new()),
            cache_clears: AtomicU64::new(0),
        }
    }

    /// How many times the cache was cleared (one per executed request)
    pub fn cache_clears(&self) -> u64 {
        self.cache_clears.load(Ordering::Relaxed)
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, rid: &str) -> Result<Option<VersionedRecord>> {
        Ok(self.records.lock().unwrap().get(rid).cloned())
    }

    fn create(&self, rid: &str, content: Value) -> Result<u64> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(rid) {
            return Err(Error::AlreadyExists(rid.to_string()));
        }
        records.insert(
            rid.to_string(),
            VersionedRecord {
                version: 1,
                content,
            },
        );
        Ok(1)
    }

    fn update(&self, rid: &str, content: Value, expected_version: Option<u64>) -> Result<u64> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(rid)
            .ok_or_else(|| Error::NotFound(rid.to_string()))?;

        if let Some(expected) = expected_version {
            if record.version != expected {
                return Err(Error::VersionConflict {
                    rid: rid.to_string(),
                    expected,
                    actual: record.version,
                });
            }
        }

        record.version += 1;
        record.content = content;
        Ok(record.version)
    }

    fn delete(&self, rid: &str, expected_version: Option<u64>) -> Result<bool> {
        let mut records = self.records.lock().unwrap();

        if let Some(expected) = expected_version {
            match records.get(rid) {
                Some(record) if record.version != expected => {
                    return Err(Error::VersionConflict {
                        rid: rid.to_string(),
                        expected,
                        actual: record.version,
                    });
                }
                _ => {}
            }
        }

        Ok(records.remove(rid).is_some())
    }

    fn force_save(&self, rid: &str, content: Value, version: u64) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(rid.to_string(), VersionedRecord { version, content });
        Ok(())
    }

    fn clear_cache(&self) {
        self.cache_clears.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_then_read() {
        let store = MemoryStore::new("db");
        let version = store.create("r1", json!({"a": 1})).unwrap();
        assert_eq!(version, 1);

        let record = store.read("r1").unwrap().unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.content, json!({"a": 1}));
    }

    #[test]
    fn test_create_duplicate_fails() {
        let store = MemoryStore::new("db");
        store.create("r1", json!(1)).unwrap();
        assert!(matches!(
            store.create("r1", json!(2)),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_update_bumps_version() {
        let store = MemoryStore::new("db");
        store.create("r1", json!(1)).unwrap();
        let version = store.update("r1", json!(2), Some(1)).unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn test_update_version_conflict() {
        let store = MemoryStore::new("db");
        store.create("r1", json!(1)).unwrap();
        let err = store.update("r1", json!(2), Some(7)).unwrap_err();
        assert!(matches!(err, Error::VersionConflict { actual: 1, .. }));
    }

    #[test]
    fn test_delete() {
        let store = MemoryStore::new("db");
        store.create("r1", json!(1)).unwrap();
        assert!(store.delete("r1", None).unwrap());
        assert!(!store.delete("r1", None).unwrap());
    }

    #[test]
    fn test_force_save_is_idempotent() {
        let store = MemoryStore::new("db");
        store.force_save("r1", json!("fixed"), 9).unwrap();
        store.force_save("r1", json!("fixed"), 9).unwrap();

        let record = store.read("r1").unwrap().unwrap();
        assert_eq!(record.version, 9);
        assert_eq!(store.record_count(), 1);
    }

    #[test]
    fn test_cache_clear_counter() {
        let store = MemoryStore::new("db");
        store.clear_cache();
        store.clear_cache();
        assert_eq!(store.cache_clears(), 2);
    }
}
