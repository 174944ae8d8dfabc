//! Single-record update orchestrator
//!
//! One student mutation end to end: existence and ownership checks, the
//! idempotency fast path, then one optimistic transaction that re-reads the
//! student, applies the mutation and writes the student together with the
//! idempotency record.

use std::sync::Arc;
use tracing::{debug, info};

use super::applier::apply_mutation;
use super::clock::Clock;
use super::idempotency::{IdempotencyCheck, IdempotencyGuard, IdempotencyScope};
use super::identity::{AccessPolicy, CallerIdentity};
use super::mutation::{MutationDescriptor, UpdateOutcome};
use super::{load_class, student_class_id};
use crate::db::{RecordKey, RecordStore, Transaction};
use crate::types::{EngineError, Result};

pub struct SingleUpdateOrchestrator {
    store: Arc<dyn RecordStore>,
    policy: Arc<dyn AccessPolicy>,
    clock: Arc<dyn Clock>,
    guard: IdempotencyGuard,
}

impl SingleUpdateOrchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        policy: Arc<dyn AccessPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let guard = IdempotencyGuard::new(store.clone(), clock.clone(), IdempotencyScope::Single);
        Self {
            store,
            policy,
            clock,
            guard,
        }
    }

    /// Apply `mutation` to one student.
    ///
    /// A concurrent change to the student surfaces as [`EngineError::Conflict`];
    /// nothing is retried here.
    pub async fn apply_student_update(
        &self,
        student_id: &str,
        mutation: &MutationDescriptor,
        caller: &CallerIdentity,
    ) -> Result<UpdateOutcome> {
        let student_key = RecordKey::student(student_id);

        let student = self
            .store
            .get(&student_key)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("student {}", student_id)))?;

        let class_id = student_class_id(&student.doc)?;
        let class = load_class(self.store.as_ref(), class_id).await?;

        if !self.policy.authorize(&class, caller) {
            return Err(EngineError::Unauthorized(format!(
                "{} may not update students of class {}",
                caller.describe(),
                class.id
            )));
        }

        let key = mutation.key();
        if let Some(key) = key {
            if let Some(prior) = self.guard.lookup::<UpdateOutcome>(key).await? {
                info!(student_id = %student_id, idempotency_key = %key, "Replaying recorded update");
                return Ok(prior);
            }
        }

        let mut tx = Transaction::begin(self.store.as_ref());

        if let Some(key) = key {
            if let IdempotencyCheck::Completed(prior) =
                self.guard.check_and_reserve::<UpdateOutcome>(&mut tx, key).await?
            {
                debug!(student_id = %student_id, idempotency_key = %key, "Key recorded by a concurrent call");
                return Ok(prior);
            }
        }

        let current = tx
            .get(&student_key)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("student {}", student_id)))?;

        let applied = apply_mutation(&current, mutation, self.clock.now())?;
        tx.set(student_key, applied.doc.clone());

        let outcome = UpdateOutcome {
            student: applied.doc,
            applied_deltas: applied.deltas,
        };

        if let Some(key) = key {
            self.guard.record(&mut tx, key, &outcome)?;
        }

        tx.commit().await?;

        info!(
            student_id = %student_id,
            class_id = %class.id,
            mode = ?mutation.mode,
            fields = outcome.applied_deltas.len(),
            "Student update applied"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{to_document, ClassDoc, StudentDoc};
    use crate::db::{Collection, CommitRequest, Document, MemoryStore, Versioned};
    use crate::engine::clock::ManualClock;
    use crate::engine::identity::ClassOwnership;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Store wrapper that lands a competing write to `s-1` just before the
    /// first commit it is handed
    struct InterleavingStore {
        inner: Arc<MemoryStore>,
        interleaved: AtomicBool,
    }

    #[async_trait]
    impl RecordStore for InterleavingStore {
        fn backend(&self) -> &'static str {
            "interleaving"
        }

        async fn get(&self, key: &RecordKey) -> Result<Option<Versioned>> {
            self.inner.get(key).await
        }

        async fn find_by_field(
            &self,
            collection: Collection,
            field: &str,
            value: &Value,
        ) -> Result<Vec<(String, Versioned)>> {
            self.inner.find_by_field(collection, field, value).await
        }

        async fn commit(&self, request: CommitRequest) -> Result<()> {
            if !self.interleaved.swap(true, Ordering::SeqCst) {
                let mut competing = Document::new();
                competing.insert("totalPoints".to_string(), json!(99));
                let mut tx = Transaction::begin(self.inner.as_ref());
                tx.update(RecordKey::student("s-1"), competing);
                tx.commit().await?;
            }
            self.inner.commit(request).await
        }
    }

    async fn seed(store: &MemoryStore, total_points: i64) {
        let now = Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap();
        let class = ClassDoc::new("c-1".into(), "t-1".into(), "Period 3".into(), Some("JOIN42".into()), now);
        let mut student = StudentDoc::new("s-1".into(), "c-1".into(), Some("Ada".into()), now);
        student.total_points = total_points;

        let mut tx = Transaction::begin(store);
        tx.set(RecordKey::class("c-1"), to_document(&class).unwrap());
        tx.set(RecordKey::student("s-1"), to_document(&student).unwrap());
        tx.commit().await.unwrap();
    }

    fn orchestrator(store: Arc<MemoryStore>) -> SingleUpdateOrchestrator {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).unwrap());
        SingleUpdateOrchestrator::new(store, Arc::new(ClassOwnership), Arc::new(clock))
    }

    #[tokio::test]
    async fn test_increment_applies_and_returns_deltas() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 10).await;
        let single = orchestrator(store.clone());

        let mutation = MutationDescriptor::increment([("totalPoints".to_string(), 5)]);
        let outcome = single
            .apply_student_update("s-1", &mutation, &CallerIdentity::teacher("t-1"))
            .await
            .unwrap();

        assert_eq!(outcome.student["totalPoints"], json!(15));
        assert_eq!(outcome.applied_deltas["totalPoints"].delta, Some(5));

        let stored = store.get(&RecordKey::student("s-1")).await.unwrap().unwrap();
        assert_eq!(stored.doc["totalPoints"], json!(15));
    }

    #[tokio::test]
    async fn test_missing_student_and_wrong_teacher() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 0).await;
        let single = orchestrator(store.clone());
        let mutation = MutationDescriptor::increment([("currency".to_string(), 1)]);

        let err = single
            .apply_student_update("ghost", &mutation, &CallerIdentity::teacher("t-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let err = single
            .apply_student_update("s-1", &mutation, &CallerIdentity::teacher("t-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));

        let ok = single
            .apply_student_update("s-1", &mutation, &CallerIdentity::with_class_code("JOIN42"))
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_same_key_applies_once() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 10).await;
        let single = orchestrator(store.clone());
        let caller = CallerIdentity::teacher("t-1");

        let mutation =
            MutationDescriptor::increment([("totalPoints".to_string(), 5)]).with_idempotency_key("award-1");
        let first = single.apply_student_update("s-1", &mutation, &caller).await.unwrap();
        let commits_after_first = store.stats().await.commits;
        let second = single.apply_student_update("s-1", &mutation, &caller).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.stats().await.commits, commits_after_first);

        let stored = store.get(&RecordKey::student("s-1")).await.unwrap().unwrap();
        assert_eq!(stored.doc["totalPoints"], json!(15));
    }

    #[tokio::test]
    async fn test_no_key_applies_twice() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 10).await;
        let single = orchestrator(store.clone());
        let caller = CallerIdentity::teacher("t-1");

        let mutation = MutationDescriptor::increment([("totalPoints".to_string(), 5)]);
        single.apply_student_update("s-1", &mutation, &caller).await.unwrap();
        single.apply_student_update("s-1", &mutation, &caller).await.unwrap();

        let stored = store.get(&RecordKey::student("s-1")).await.unwrap().unwrap();
        assert_eq!(stored.doc["totalPoints"], json!(20));
    }

    #[tokio::test]
    async fn test_invalid_mutation_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 10).await;
        let single = orchestrator(store.clone());
        let commits = store.stats().await.commits;

        let mutation = MutationDescriptor::increment([("classId".to_string(), 1)]);
        let err = single
            .apply_student_update("s-1", &mutation, &CallerIdentity::teacher("t-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidMutation(_)));
        assert_eq!(store.stats().await.commits, commits);
    }

    #[tokio::test]
    async fn test_concurrent_change_surfaces_conflict() {
        let memory = Arc::new(MemoryStore::new());
        seed(&memory, 10).await;
        let store = Arc::new(InterleavingStore {
            inner: memory.clone(),
            interleaved: AtomicBool::new(false),
        });
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).unwrap());
        let single = SingleUpdateOrchestrator::new(store, Arc::new(ClassOwnership), Arc::new(clock));
        let caller = CallerIdentity::teacher("t-1");

        let mutation =
            MutationDescriptor::increment([("totalPoints".to_string(), 5)]).with_idempotency_key("award-2");
        let err = single
            .apply_student_update("s-1", &mutation, &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        // only the competing write landed, and the key was not consumed
        let stored = memory.get(&RecordKey::student("s-1")).await.unwrap().unwrap();
        assert_eq!(stored.doc["totalPoints"], json!(99));

        let outcome = single.apply_student_update("s-1", &mutation, &caller).await.unwrap();
        assert_eq!(outcome.student["totalPoints"], json!(104));
    }
}
