//! Idempotency record schema

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Completed-operation record stored under `idempotency/<scope>/<key>`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyDoc {
    pub key: String,

    /// Serialized outcome returned verbatim on replay
    pub outcome: Value,

    pub created_at: DateTime<Utc>,
}
