//! Persistence boundary (§6 "Storage adapter"): documents, the append-only
//! operation log, vector clocks, and awareness all persist through the same
//! key/value surface so storage backends can be swapped without touching
//! the sync layer.
//!
//! Key schema:
//! - `doc:<docId>` — serialized document snapshot
//! - `log:<docId>/<opId>` — one operation log entry
//! - `vc:<docId>` — serialized vector clock
//! - `awareness:<docId>` — serialized awareness state

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::SyncKitResult;

/// Build the `log:<docId>/<opId>` key used for operation log entries.
#[must_use]
pub fn log_key(document_id: &str, op_id: &str) -> String {
    format!("log:{document_id}/{op_id}")
}

/// Build the `doc:<docId>` key used for document snapshots.
#[must_use]
pub fn doc_key(document_id: &str) -> String {
    format!("doc:{document_id}")
}

/// Build the `vc:<docId>` key used for vector clock snapshots.
#[must_use]
pub fn vc_key(document_id: &str) -> String {
    format!("vc:{document_id}")
}

/// Build the `awareness:<docId>` key used for awareness state.
#[must_use]
pub fn awareness_key(document_id: &str) -> String {
    format!("awareness:{document_id}")
}

/// A durable key/value surface for server-side persistence (§6).
///
/// Implementations are free to back this with anything from an in-memory
/// map to a replicated KV store; the sync layer only ever depends on this
/// trait, never on a concrete backend.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Fetch the raw bytes stored at `key`, if any.
    async fn get(&self, key: &str) -> SyncKitResult<Option<Vec<u8>>>;

    /// Store `value` at `key`, overwriting any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> SyncKitResult<()>;

    /// Remove the value stored at `key`, if any.
    async fn delete(&self, key: &str) -> SyncKitResult<()>;

    /// List every key carrying `prefix`, in no particular order.
    async fn list(&self, prefix: &str) -> SyncKitResult<Vec<String>>;

    /// Apply a batch of writes atomically with respect to concurrent
    /// readers of any key in the batch.
    async fn transaction(&self, writes: Vec<(String, Option<Vec<u8>>)>) -> SyncKitResult<()>;
}

/// A `DashMap`-backed reference [`StorageAdapter`] for tests, demos, and
/// single-instance deployments that don't need durability across restarts.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    /// An empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn get(&self, key: &str) -> SyncKitResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> SyncKitResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> SyncKitResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> SyncKitResult<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn transaction(&self, writes: Vec<(String, Option<Vec<u8>>)>) -> SyncKitResult<()> {
        for (key, value) in writes {
            match value {
                Some(bytes) => {
                    self.entries.insert(key, bytes);
                }
                None => {
                    self.entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
