//! In-memory record store
//!
//! Default backend for single-node deployments and the test suite. Commits
//! validate and apply under one write lock, so a commit is atomic and readers
//! only ever wait for an in-progress commit.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::store::{
    merge_fields, Collection, CommitRequest, RecordKey, RecordStore, Versioned, WriteOp,
};
use crate::types::{EngineError, Result};

/// Versioned documents held in process memory
pub struct MemoryStore {
    records: RwLock<HashMap<RecordKey, Versioned>>,
    commits: AtomicU64,
    conflicts: AtomicU64,
}

/// Counters exposed for health output and tests
#[derive(Debug, Clone)]
pub struct MemoryStoreStats {
    pub documents: usize,
    pub commits: u64,
    pub conflicts: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            commits: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    pub async fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            documents: self.records.read().await.len(),
            commits: self.commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<Versioned>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn find_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Versioned)>> {
        let records = self.records.read().await;
        let mut found: Vec<(String, Versioned)> = records
            .iter()
            .filter(|(key, record)| {
                key.collection == collection && record.doc.get(field) == Some(value)
            })
            .map(|(key, record)| (key.id.clone(), record.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    async fn commit(&self, request: CommitRequest) -> Result<()> {
        let mut records = self.records.write().await;

        // Validate every read before touching anything
        for (key, expected) in &request.reads {
            let actual = records.get(key).map(|r| r.version).unwrap_or(0);
            if actual != *expected {
                self.conflicts.fetch_add(1, Ordering::Relaxed);
                return Err(CommitRequest::stale(key, *expected, actual));
            }
        }

        for (key, op) in &request.writes {
            if matches!(op, WriteOp::Update(_)) && !records.contains_key(key) {
                return Err(EngineError::NotFound(format!("{} (update target)", key)));
            }
        }

        let write_count = request.writes.len();
        for (key, op) in request.writes {
            let version = records.get(&key).map(|r| r.version).unwrap_or(0) + 1;
            let doc = match op {
                WriteOp::Set(doc) => doc,
                WriteOp::Update(fields) => {
                    let mut doc = records
                        .get(&key)
                        .map(|r| r.doc.clone())
                        .unwrap_or_default();
                    merge_fields(&mut doc, &fields);
                    doc
                }
            };
            records.insert(key, Versioned { version, doc });
        }

        self.commits.fetch_add(1, Ordering::Relaxed);
        debug!(writes = write_count, "Memory store commit applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::{Document, Transaction};
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_update_requires_existing_document() {
        let store = MemoryStore::new();
        let mut tx = Transaction::begin(&store);
        tx.update(RecordKey::class("missing"), doc(json!({"lastActivity": "now"})));

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert_eq!(store.stats().await.documents, 0);
    }

    #[tokio::test]
    async fn test_find_by_field() {
        let store = MemoryStore::new();
        let mut tx = Transaction::begin(&store);
        tx.set(RecordKey::student("b"), doc(json!({"classId": "c-1"})));
        tx.set(RecordKey::student("a"), doc(json!({"classId": "c-1"})));
        tx.set(RecordKey::student("z"), doc(json!({"classId": "c-2"})));
        tx.set(RecordKey::class("c-1"), doc(json!({"classId": "c-1"})));
        tx.commit().await.unwrap();

        let found = store
            .find_by_field(Collection::Students, "classId", &json!("c-1"))
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_conflict_counter() {
        let store = MemoryStore::new();
        let key = RecordKey::student("s");
        let mut request = CommitRequest::default();
        request.reads.insert(key.clone(), 3);
        request.writes.insert(key, WriteOp::Set(Document::new()));

        assert!(store.commit(request).await.is_err());
        let stats = store.stats().await;
        assert_eq!(stats.conflicts, 1);
        assert_eq!(stats.commits, 0);
    }
}
