//! Idempotency guard
//!
//! A completed operation leaves an `idempotency/<scope>/<key>` record holding
//! its serialized outcome. Each operation kind has its own scope, so a key
//! reused across endpoints never replays an outcome of the wrong shape. The check and the write both happen inside the
//! transaction that applies the mutation, so two concurrent submissions of
//! one key cannot both commit: the loser's read of the (then absent) record
//! is stale at commit time and the store rejects it.

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::clock::Clock;
use crate::db::schemas::{from_document, to_document, IdempotencyDoc};
use crate::db::{RecordKey, RecordStore, Transaction};
use crate::types::{EngineError, Result};

/// Result of checking a key inside a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyCheck<T> {
    /// The key already completed; this is its stored outcome
    Completed(T),
    /// The key is unused; the caller may apply and then [`IdempotencyGuard::record`]
    Reserved,
}

impl<T> IdempotencyCheck<T> {
    pub fn already_completed(&self) -> bool {
        matches!(self, IdempotencyCheck::Completed(_))
    }
}

/// Operation kind a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyScope {
    /// Single-record updates
    Single,
    /// Whole batch calls
    Batch,
    /// One student of a keyed batch call
    BatchItem,
}

impl IdempotencyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyScope::Single => "single",
            IdempotencyScope::Batch => "batch",
            IdempotencyScope::BatchItem => "batch-item",
        }
    }
}

/// Maps operation keys to completed-operation records
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    scope: IdempotencyScope,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, scope: IdempotencyScope) -> Self {
        Self { store, clock, scope }
    }

    fn record_key(&self, key: &str) -> RecordKey {
        RecordKey::idempotency(format!("{}/{}", self.scope.as_str(), key))
    }

    /// Non-transactional fast path: stored outcome if the key already completed
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(&self.record_key(key)).await? {
            Some(found) => {
                debug!(idempotency_key = %key, "Idempotency key already recorded");
                Ok(Some(decode_outcome(&found.doc)?))
            }
            None => Ok(None),
        }
    }

    /// Read the key's record inside `tx`
    pub async fn check_and_reserve<T: DeserializeOwned>(
        &self,
        tx: &mut Transaction<'_>,
        key: &str,
    ) -> Result<IdempotencyCheck<T>> {
        match tx.get(&self.record_key(key)).await? {
            Some(doc) => Ok(IdempotencyCheck::Completed(decode_outcome(&doc)?)),
            None => Ok(IdempotencyCheck::Reserved),
        }
    }

    /// Buffer the completed-operation record in `tx`
    pub fn record<T: Serialize>(
        &self,
        tx: &mut Transaction<'_>,
        key: &str,
        outcome: &T,
    ) -> Result<()> {
        let record = IdempotencyDoc {
            key: key.to_string(),
            outcome: serde_json::to_value(outcome)?,
            created_at: self.clock.now(),
        };
        tx.set(self.record_key(key), to_document(&record)?);
        Ok(())
    }
}

fn decode_outcome<T: DeserializeOwned>(doc: &crate::db::Document) -> Result<T> {
    let record: IdempotencyDoc = from_document(doc)?;
    serde_json::from_value(record.outcome).map_err(|e| {
        EngineError::Internal(format!(
            "Stored outcome for key '{}' does not match this operation: {}",
            record.key, e
        ))
    })
}
