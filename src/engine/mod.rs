//! Student progression update engine
//!
//! Applies point, currency and game-state mutations to student records with
//! optimistic concurrency, per-item failure isolation for batches, and
//! at-most-once application per idempotency key.
//!
//! ## Architecture
//!
//! ```text
//! caller ─┬─> SingleUpdateOrchestrator ─┐
//!         └─> BatchUpdateOrchestrator ──┼─> IdempotencyGuard
//!                 │  (TokenBucket)      └─> apply_mutation (inside a Transaction)
//!                 └─> ClassMembershipIndex (class targets)
//! ```

pub mod applier;
pub mod batch;
pub mod clock;
pub mod idempotency;
pub mod identity;
pub mod membership;
pub mod mutation;
pub mod single;
pub mod throttle;

pub use applier::{apply_mutation, AppliedMutation};
pub use batch::{BatchSettings, BatchUpdateOrchestrator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use idempotency::{IdempotencyCheck, IdempotencyGuard, IdempotencyScope};
pub use identity::{AccessPolicy, CallerIdentity, ClassOwnership};
pub use membership::{ClassMembershipIndex, MembershipStrategy};
pub use mutation::{
    AppliedDeltas, BatchFailure, BatchOutcome, BatchSuccess, BatchTarget, FieldChange,
    MutationDescriptor, MutationMode, UpdateOutcome,
};
pub use single::SingleUpdateOrchestrator;
pub use throttle::TokenBucket;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::db::schemas::{from_document, ClassDoc};
use crate::db::{Document, RecordKey, RecordStore};
use crate::types::{EngineError, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Engine tuning, derived from the command line at startup
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Students per sub-batch transaction
    pub sub_batch_size: usize,
    /// Sub-batch transactions issued per second (0 = unthrottled)
    pub txn_rate_per_sec: f64,
    /// Sub-batch transactions that may be issued back to back
    pub txn_burst: u32,
    /// Extra attempts for a sub-batch that hit a conflict
    pub sub_batch_retries: u32,
    /// How class rosters are read
    pub membership_strategy: MembershipStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sub_batch_size: 50,
            txn_rate_per_sec: 20.0,
            txn_burst: 1,
            sub_batch_retries: 0,
            membership_strategy: MembershipStrategy::Indexed,
        }
    }
}

impl EngineConfig {
    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            sub_batch_size: self.sub_batch_size,
            sub_batch_retries: self.sub_batch_retries,
        }
    }
}

// ============================================================================
// Engine facade
// ============================================================================

/// Both entry points wired to one store, policy and clock
pub struct UpdateEngine {
    single: SingleUpdateOrchestrator,
    batch: BatchUpdateOrchestrator,
    index: ClassMembershipIndex,
}

impl UpdateEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        policy: Arc<dyn AccessPolicy>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let index = ClassMembershipIndex::new(store.clone(), config.membership_strategy);
        let throttle = Arc::new(TokenBucket::new(config.txn_rate_per_sec, config.txn_burst));

        Self {
            single: SingleUpdateOrchestrator::new(store.clone(), policy.clone(), clock.clone()),
            batch: BatchUpdateOrchestrator::new(
                store,
                policy,
                clock,
                index.clone(),
                throttle,
                config.batch_settings(),
            ),
            index,
        }
    }

    pub fn membership(&self) -> &ClassMembershipIndex {
        &self.index
    }

    pub async fn apply_student_update(
        &self,
        student_id: &str,
        mutation: &MutationDescriptor,
        caller: &CallerIdentity,
    ) -> Result<UpdateOutcome> {
        self.single
            .apply_student_update(student_id, mutation, caller)
            .await
    }

    pub async fn apply_batch_update(
        &self,
        target: &BatchTarget,
        mutation: &MutationDescriptor,
        caller: &CallerIdentity,
    ) -> Result<BatchOutcome> {
        self.batch.apply_batch_update(target, mutation, caller).await
    }

    pub async fn members(&self, class_id: &str) -> Result<BTreeSet<String>> {
        self.index.members(class_id).await
    }
}

// ============================================================================
// Shared lookups
// ============================================================================

/// Load and decode a class outside any transaction
pub(crate) async fn load_class(store: &dyn RecordStore, class_id: &str) -> Result<ClassDoc> {
    let found = store
        .get(&RecordKey::class(class_id))
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("class {}", class_id)))?;
    from_document(&found.doc)
}

/// The owning class of a student document
pub(crate) fn student_class_id(doc: &Document) -> Result<&str> {
    doc.get("classId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            let id = doc.get("id").and_then(|v| v.as_str()).unwrap_or("?");
            EngineError::Store(format!("student {} has no classId", id))
        })
}
