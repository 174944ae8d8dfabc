//! Batch update orchestrator
//!
//! Applies one mutation to many students. Targets are split into fixed-size
//! sub-batches, each committed in its own optimistic transaction, and every
//! student ends up in exactly one of `succeeded` or `failed`. Only the
//! class-level pre-flight (missing class, caller not authorized) fails the
//! whole call, and it does so before anything is written.
//!
//! With an idempotency key every student's result is recorded as
//! `<key>#<studentId>` inside the sub-batch transaction that applied it. A
//! retried call replays those results and applies only the students that were
//! never committed, however the target list is partitioned this time. The
//! whole-call record is written last, and only when every sub-batch committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::applier::{apply_mutation, LAST_ACTIVITY};
use super::clock::Clock;
use super::idempotency::{IdempotencyCheck, IdempotencyGuard, IdempotencyScope};
use super::identity::{AccessPolicy, CallerIdentity};
use super::membership::ClassMembershipIndex;
use super::mutation::{BatchFailure, BatchOutcome, BatchSuccess, BatchTarget, MutationDescriptor};
use super::throttle::TokenBucket;
use super::{load_class, student_class_id};
use crate::db::{Document, RecordKey, RecordStore, Transaction};
use crate::types::{EngineError, FailureReason, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Tuning for sub-batch partitioning and retry
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    /// Students per sub-batch transaction
    pub sub_batch_size: usize,
    /// Extra attempts for a sub-batch whose commit hit a conflict
    pub sub_batch_retries: u32,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            sub_batch_size: 50,
            sub_batch_retries: 0,
        }
    }
}

/// Derived idempotency key for one student of a keyed batch
fn item_key(key: &str, student_id: &str) -> String {
    format!("{}#{}", key, student_id)
}

/// Recorded result for one student of a keyed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum ItemOutcome {
    Succeeded(BatchSuccess),
    Failed(BatchFailure),
}

impl ItemOutcome {
    fn failed(id: &str, reason: FailureReason, message: impl Into<String>) -> Self {
        ItemOutcome::Failed(BatchFailure {
            id: id.to_string(),
            reason,
            message: message.into(),
        })
    }

    fn push_into(self, outcome: &mut BatchOutcome) {
        match self {
            ItemOutcome::Succeeded(success) => outcome.succeeded.push(success),
            ItemOutcome::Failed(failure) => outcome.failed.push(failure),
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Item-level class check result, cached per call
type ClassVerdict = Option<(FailureReason, String)>;

/// Result of one sub-batch attempt.
///
/// `outcome` holds what was decided before `error` (if any) stopped the
/// attempt; on error nothing of the attempt was committed. `replayed` names
/// the students whose results came from an earlier committed call and stand
/// regardless of `error`.
#[derive(Default)]
struct SubBatchAttempt {
    outcome: BatchOutcome,
    replayed: HashSet<String>,
    error: Option<EngineError>,
}

impl SubBatchAttempt {
    fn abort(mut self, error: EngineError) -> Self {
        self.error = Some(error);
        self
    }
}

pub struct BatchUpdateOrchestrator {
    store: Arc<dyn RecordStore>,
    policy: Arc<dyn AccessPolicy>,
    clock: Arc<dyn Clock>,
    guard: IdempotencyGuard,
    item_guard: IdempotencyGuard,
    index: ClassMembershipIndex,
    throttle: Arc<TokenBucket>,
    settings: BatchSettings,
}

impl BatchUpdateOrchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        policy: Arc<dyn AccessPolicy>,
        clock: Arc<dyn Clock>,
        index: ClassMembershipIndex,
        throttle: Arc<TokenBucket>,
        settings: BatchSettings,
    ) -> Self {
        let guard = IdempotencyGuard::new(store.clone(), clock.clone(), IdempotencyScope::Batch);
        let item_guard = IdempotencyGuard::new(store.clone(), clock.clone(), IdempotencyScope::BatchItem);
        Self {
            store,
            policy,
            clock,
            guard,
            item_guard,
            index,
            throttle,
            settings: BatchSettings {
                sub_batch_size: settings.sub_batch_size.max(1),
                ..settings
            },
        }
    }

    /// Apply `mutation` to every targeted student.
    ///
    /// Returns `Err` only for the class-level pre-flight or a store failure
    /// while resolving the target; everything after that is reported per item.
    pub async fn apply_batch_update(
        &self,
        target: &BatchTarget,
        mutation: &MutationDescriptor,
        caller: &CallerIdentity,
    ) -> Result<BatchOutcome> {
        let scope = target.class_id();
        let mut verdicts: HashMap<String, ClassVerdict> = HashMap::new();

        if let Some(class_id) = scope {
            let class = load_class(self.store.as_ref(), class_id).await?;
            if !self.policy.authorize(&class, caller) {
                warn!(class_id = %class_id, caller = %caller.describe(), "Batch update rejected");
                return Err(EngineError::Unauthorized(format!(
                    "{} may not update students of class {}",
                    caller.describe(),
                    class_id
                )));
            }
            verdicts.insert(class_id.to_string(), None);
        }

        let ids = match target {
            BatchTarget::Students { ids, .. } => dedupe(ids),
            BatchTarget::Class { class_id } => {
                self.index.members(class_id).await?.into_iter().collect()
            }
        };

        let key = mutation.key();
        if let Some(key) = key {
            if let Some(prior) = self.guard.lookup::<BatchOutcome>(key).await? {
                info!(idempotency_key = %key, "Replaying recorded batch update");
                return Ok(prior);
            }
        }

        info!(
            targets = ids.len(),
            class_id = scope.unwrap_or("-"),
            sub_batch_size = self.settings.sub_batch_size,
            mode = ?mutation.mode,
            "Batch update started"
        );

        let mut outcome = BatchOutcome::default();
        let mut all_committed = true;
        for (index, chunk) in ids.chunks(self.settings.sub_batch_size).enumerate() {
            let (sub_outcome, committed) = self
                .run_sub_batch(index, chunk, scope, mutation, caller, &mut verdicts)
                .await;
            all_committed &= committed;
            outcome.extend(sub_outcome);
        }

        if let (Some(key), true) = (key, all_committed) {
            if let Err(e) = self.record_call(key, &outcome).await {
                warn!(idempotency_key = %key, error = %e, "Failed to record batch outcome");
            }
        }

        if let Some(class_id) = scope {
            self.stamp_class_activity(class_id);
        }

        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "Batch update completed"
        );

        Ok(outcome)
    }

    /// Run one sub-batch, retrying conflicts up to the configured bound.
    /// The flag is false when the sub-batch transaction never committed.
    async fn run_sub_batch(
        &self,
        index: usize,
        ids: &[String],
        scope: Option<&str>,
        mutation: &MutationDescriptor,
        caller: &CallerIdentity,
        verdicts: &mut HashMap<String, ClassVerdict>,
    ) -> (BatchOutcome, bool) {
        let mut attempt_no = 0;
        loop {
            self.throttle.acquire().await;

            let mut attempt = self
                .attempt_sub_batch(ids, scope, mutation, caller, verdicts)
                .await;

            let error = match attempt.error.take() {
                None => {
                    debug!(
                        sub_batch = index,
                        succeeded = attempt.outcome.succeeded.len(),
                        failed = attempt.outcome.failed.len(),
                        "Sub-batch committed"
                    );
                    return (attempt.outcome, true);
                }
                Some(error) => error,
            };

            if matches!(error, EngineError::Conflict(_)) && attempt_no < self.settings.sub_batch_retries {
                attempt_no += 1;
                debug!(sub_batch = index, attempt = attempt_no, "Retrying sub-batch after conflict");
                continue;
            }

            warn!(sub_batch = index, size = ids.len(), error = %error, "Sub-batch transaction failed");
            return (fail_remaining(ids, attempt, &error), false);
        }
    }

    async fn attempt_sub_batch(
        &self,
        ids: &[String],
        scope: Option<&str>,
        mutation: &MutationDescriptor,
        caller: &CallerIdentity,
        verdicts: &mut HashMap<String, ClassVerdict>,
    ) -> SubBatchAttempt {
        let mut attempt = SubBatchAttempt::default();
        let mut tx = Transaction::begin(self.store.as_ref());
        let key = mutation.key();
        let now = self.clock.now();

        for id in ids {
            let marker = key.map(|k| item_key(k, id));

            if let Some(marker) = &marker {
                match self.item_guard.check_and_reserve::<ItemOutcome>(&mut tx, marker).await {
                    Ok(IdempotencyCheck::Completed(prior)) => {
                        debug!(student_id = %id, idempotency_key = %marker, "Replaying recorded batch item");
                        attempt.replayed.insert(id.clone());
                        prior.push_into(&mut attempt.outcome);
                        continue;
                    }
                    Ok(IdempotencyCheck::Reserved) => {}
                    Err(e) => return attempt.abort(e),
                }
            }

            let item = match self
                .apply_item(&mut tx, id, scope, mutation, caller, verdicts, now)
                .await
            {
                Ok(item) => item,
                Err(e) => return attempt.abort(e),
            };

            if let Some(marker) = &marker {
                if let Err(e) = self.item_guard.record(&mut tx, marker, &item) {
                    return attempt.abort(e);
                }
            }
            item.push_into(&mut attempt.outcome);
        }

        match tx.commit().await {
            Ok(()) => attempt,
            Err(e) => attempt.abort(e),
        }
    }

    /// Decide one student inside `tx`, buffering its write on success.
    /// `Err` aborts the whole sub-batch.
    #[allow(clippy::too_many_arguments)]
    async fn apply_item(
        &self,
        tx: &mut Transaction<'_>,
        id: &str,
        scope: Option<&str>,
        mutation: &MutationDescriptor,
        caller: &CallerIdentity,
        verdicts: &mut HashMap<String, ClassVerdict>,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome> {
        let student_key = RecordKey::student(id);
        let current = match tx.get(&student_key).await? {
            Some(doc) => doc,
            None => {
                return Ok(ItemOutcome::failed(id, FailureReason::NotFound, format!("student {}", id)))
            }
        };

        let verdict = match student_class_id(&current) {
            Ok(class_id) => match scope {
                Some(scoped) if scoped != class_id => Some((
                    FailureReason::Unauthorized,
                    format!("student {} is not in class {}", id, scoped),
                )),
                _ => self.class_verdict(class_id, caller, verdicts).await?,
            },
            Err(e) => Some((FailureReason::from(&e), e.to_string())),
        };

        if let Some((reason, message)) = verdict {
            return Ok(ItemOutcome::failed(id, reason, message));
        }

        match apply_mutation(&current, mutation, now) {
            Ok(applied) => {
                tx.set(student_key, applied.doc);
                Ok(ItemOutcome::Succeeded(BatchSuccess {
                    id: id.to_string(),
                    deltas: applied.deltas,
                }))
            }
            Err(e) => Ok(ItemOutcome::failed(id, FailureReason::from(&e), e.to_string())),
        }
    }

    /// Ownership check for a student's class when the call is not class-scoped
    async fn class_verdict(
        &self,
        class_id: &str,
        caller: &CallerIdentity,
        verdicts: &mut HashMap<String, ClassVerdict>,
    ) -> Result<ClassVerdict> {
        if let Some(cached) = verdicts.get(class_id) {
            return Ok(cached.clone());
        }

        let verdict = match load_class(self.store.as_ref(), class_id).await {
            Ok(class) if self.policy.authorize(&class, caller) => None,
            Ok(_) => Some((
                FailureReason::Unauthorized,
                format!("{} may not update students of class {}", caller.describe(), class_id),
            )),
            Err(EngineError::NotFound(what)) => Some((FailureReason::NotFound, what)),
            Err(e) => return Err(e),
        };

        verdicts.insert(class_id.to_string(), verdict.clone());
        Ok(verdict)
    }

    /// Record the whole-call outcome. A concurrent call that recorded first wins.
    async fn record_call(&self, key: &str, outcome: &BatchOutcome) -> Result<()> {
        let mut tx = Transaction::begin(self.store.as_ref());
        if self
            .guard
            .check_and_reserve::<BatchOutcome>(&mut tx, key)
            .await?
            .already_completed()
        {
            return Ok(());
        }
        self.guard.record(&mut tx, key, outcome)?;
        tx.commit().await
    }

    /// Best-effort, non-blocking `lastActivity` stamp on the class
    fn stamp_class_activity(&self, class_id: &str) {
        let store = self.store.clone();
        let class_id = class_id.to_string();
        let now = self.clock.now();

        tokio::spawn(async move {
            let stamp = match serde_json::to_value(now) {
                Ok(stamp) => stamp,
                Err(e) => {
                    warn!(class_id = %class_id, error = %e, "Failed to encode class activity stamp");
                    return;
                }
            };
            let mut fields = Document::new();
            fields.insert(LAST_ACTIVITY.to_string(), stamp);

            let mut tx = Transaction::begin(store.as_ref());
            tx.update(RecordKey::class(class_id.as_str()), fields);
            match tx.commit().await {
                Ok(()) => debug!(class_id = %class_id, "Class activity stamped"),
                Err(e) => warn!(class_id = %class_id, error = %e, "Class activity stamp failed"),
            }
        });
    }
}

/// Collapse duplicate IDs, keeping first occurrences in order
fn dedupe(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Every ID of a failed sub-batch fails with the transaction's error, except
/// item-level failures and results replayed from an earlier committed call
fn fail_remaining(ids: &[String], attempt: SubBatchAttempt, error: &EngineError) -> BatchOutcome {
    let SubBatchAttempt {
        outcome: decided,
        replayed,
        ..
    } = attempt;

    let mut failures: HashMap<String, BatchFailure> = decided
        .failed
        .into_iter()
        .map(|f| (f.id.clone(), f))
        .collect();
    let mut successes: HashMap<String, BatchSuccess> = decided
        .succeeded
        .into_iter()
        .filter(|s| replayed.contains(&s.id))
        .map(|s| (s.id.clone(), s))
        .collect();

    let reason = FailureReason::from(error);
    let message = error.to_string();

    let mut outcome = BatchOutcome::default();
    for id in ids {
        if let Some(failure) = failures.remove(id) {
            outcome.failed.push(failure);
        } else if let Some(success) = successes.remove(id) {
            outcome.succeeded.push(success);
        } else {
            outcome.fail(id.as_str(), reason, message.clone());
        }
    }
    outcome
}
