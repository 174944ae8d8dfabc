//! Store trait and optimistic transaction handle
//!
//! Every document carries a version. A [`Transaction`] records the version of
//! each document it reads and buffers its writes; at commit the backend
//! re-checks every recorded version and applies the writes only if none
//! changed (first committer wins). Version `0` stands for "absent", so a
//! transaction that observed a missing document conflicts with a concurrent
//! insert of that document.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::types::{EngineError, Result};

/// A stored document: a JSON object
pub type Document = serde_json::Map<String, Value>;

/// Logical collections held by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Students,
    Classes,
    Memberships,
    Idempotency,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Students => "students",
            Collection::Classes => "classes",
            Collection::Memberships => "memberships",
            Collection::Idempotency => "idempotency",
        }
    }
}

/// Address of one document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub collection: Collection,
    pub id: String,
}

impl RecordKey {
    pub fn new(collection: Collection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
        }
    }

    pub fn student(id: impl Into<String>) -> Self {
        Self::new(Collection::Students, id)
    }

    pub fn class(id: impl Into<String>) -> Self {
        Self::new(Collection::Classes, id)
    }

    pub fn membership(class_id: impl Into<String>) -> Self {
        Self::new(Collection::Memberships, class_id)
    }

    pub fn idempotency(key: impl Into<String>) -> Self {
        Self::new(Collection::Idempotency, key)
    }

    /// Flat form used as the primary key by document backends
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection.as_str(), self.id)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection.as_str(), self.id)
    }
}

/// A document together with the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub version: u64,
    pub doc: Document,
}

/// Buffered write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replace (or create) the whole document
    Set(Document),
    /// Merge top-level fields into an existing document; fails if absent
    Update(Document),
}

/// Everything a backend needs to validate and apply one transaction
#[derive(Debug, Clone, Default)]
pub struct CommitRequest {
    /// Version observed for each read document (0 = absent)
    pub reads: BTreeMap<RecordKey, u64>,
    /// Writes to apply atomically if every read is still current
    pub writes: BTreeMap<RecordKey, WriteOp>,
}

impl CommitRequest {
    /// Build the conflict error for a stale read
    pub fn stale(key: &RecordKey, expected: u64, actual: u64) -> EngineError {
        EngineError::Conflict(format!(
            "{} changed during transaction (read version {}, now {})",
            key, expected, actual
        ))
    }
}

/// Backend contract
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Backend identifier for logs and health output
    fn backend(&self) -> &'static str;

    /// Single-document read outside any transaction
    async fn get(&self, key: &RecordKey) -> Result<Option<Versioned>>;

    /// All documents of a collection whose top-level `field` equals `value`
    async fn find_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Versioned)>>;

    /// Validate reads and apply writes atomically.
    ///
    /// Returns [`EngineError::Conflict`] when any read version is stale; in
    /// that case nothing is written.
    async fn commit(&self, request: CommitRequest) -> Result<()>;

    /// Release backend resources at process stop
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Merge `fields` into `target`, top level only
pub fn merge_fields(target: &mut Document, fields: &Document) {
    for (k, v) in fields {
        target.insert(k.clone(), v.clone());
    }
}

/// Optimistic transaction handle.
///
/// Reads are repeatable: the first read of a key pins its snapshot and
/// version, later reads return the pinned snapshot with any buffered writes
/// applied on top.
pub struct Transaction<'a> {
    store: &'a dyn RecordStore,
    reads: BTreeMap<RecordKey, u64>,
    snapshots: HashMap<RecordKey, Option<Document>>,
    writes: BTreeMap<RecordKey, WriteOp>,
}

impl<'a> Transaction<'a> {
    /// Open a transaction against `store`
    pub fn begin(store: &'a dyn RecordStore) -> Self {
        Self {
            store,
            reads: BTreeMap::new(),
            snapshots: HashMap::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Read a document, recording its version for commit-time validation
    pub async fn get(&mut self, key: &RecordKey) -> Result<Option<Document>> {
        if !self.snapshots.contains_key(key) {
            let found = self.store.get(key).await?;
            let (version, doc) = match found {
                Some(v) => (v.version, Some(v.doc)),
                None => (0, None),
            };
            self.reads.insert(key.clone(), version);
            self.snapshots.insert(key.clone(), doc);
        }

        let base = self.snapshots.get(key).cloned().flatten();
        Ok(match self.writes.get(key) {
            Some(WriteOp::Set(doc)) => Some(doc.clone()),
            Some(WriteOp::Update(fields)) => base.map(|mut doc| {
                merge_fields(&mut doc, fields);
                doc
            }),
            None => base,
        })
    }

    /// Buffer a full-document write
    pub fn set(&mut self, key: RecordKey, doc: Document) {
        self.writes.insert(key, WriteOp::Set(doc));
    }

    /// Buffer a top-level field merge
    pub fn update(&mut self, key: RecordKey, fields: Document) {
        match self.writes.get_mut(&key) {
            Some(WriteOp::Set(doc)) | Some(WriteOp::Update(doc)) => merge_fields(doc, &fields),
            None => {
                self.writes.insert(key, WriteOp::Update(fields));
            }
        }
    }

    /// Number of buffered writes
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Commit the transaction.
    ///
    /// A transaction without writes commits nothing and never conflicts.
    pub async fn commit(self) -> Result<()> {
        if self.writes.is_empty() {
            return Ok(());
        }

        self.store
            .commit(CommitRequest {
                reads: self.reads,
                writes: self.writes,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_record_key_path() {
        let key = RecordKey::student("s-1");
        assert_eq!(key.path(), "students/s-1");
        assert_eq!(key.to_string(), "students/s-1");
        assert_eq!(RecordKey::membership("c-1").path(), "memberships/c-1");
    }

    #[tokio::test]
    async fn test_read_your_writes() {
        let store = MemoryStore::new();
        let mut tx = Transaction::begin(&store);

        let key = RecordKey::student("s-1");
        assert!(tx.get(&key).await.unwrap().is_none());

        tx.set(key.clone(), doc(json!({"totalPoints": 1})));
        tx.update(key.clone(), doc(json!({"currency": 2})));

        let seen = tx.get(&key).await.unwrap().unwrap();
        assert_eq!(seen["totalPoints"], json!(1));
        assert_eq!(seen["currency"], json!(2));
        assert_eq!(tx.write_count(), 1);

        tx.commit().await.unwrap();
        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.doc["currency"], json!(2));
    }

    #[tokio::test]
    async fn test_stale_read_conflicts() {
        let store = MemoryStore::new();
        let key = RecordKey::student("s-1");

        let mut seed = Transaction::begin(&store);
        seed.set(key.clone(), doc(json!({"totalPoints": 0})));
        seed.commit().await.unwrap();

        let mut first = Transaction::begin(&store);
        let mut second = Transaction::begin(&store);
        first.get(&key).await.unwrap();
        second.get(&key).await.unwrap();

        first.set(key.clone(), doc(json!({"totalPoints": 5})));
        second.set(key.clone(), doc(json!({"totalPoints": 7})));

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.doc["totalPoints"], json!(5));
    }

    #[tokio::test]
    async fn test_observed_absence_conflicts_with_insert() {
        let store = MemoryStore::new();
        let key = RecordKey::idempotency("op-1");

        let mut tx = Transaction::begin(&store);
        assert!(tx.get(&key).await.unwrap().is_none());

        let mut racer = Transaction::begin(&store);
        racer.set(key.clone(), doc(json!({"winner": "racer"})));
        racer.commit().await.unwrap();

        tx.set(key.clone(), doc(json!({"winner": "tx"})));
        assert!(matches!(
            tx.commit().await,
            Err(EngineError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_read_only_transaction_commits_nothing() {
        let store = MemoryStore::new();
        let mut tx = Transaction::begin(&store);
        tx.get(&RecordKey::class("c-1")).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.stats().await.commits, 0);
    }
}
