//! Mutation descriptors and update outcomes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::db::Document;
use crate::types::FailureReason;

/// How the named fields are changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationMode {
    /// Add integer deltas to numeric fields, clamped at zero
    Increment,
    /// Replace fields verbatim
    Set,
}

/// Request-scoped description of a change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationDescriptor {
    pub mode: MutationMode,

    /// Field name (dotted path allowed) to delta or replacement value
    pub fields: Document,

    /// Caller-supplied key; absent means no de-duplication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl MutationDescriptor {
    pub fn increment(fields: impl IntoIterator<Item = (String, i64)>) -> Self {
        Self {
            mode: MutationMode::Increment,
            fields: fields
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect(),
            idempotency_key: None,
        }
    }

    pub fn set(fields: Document) -> Self {
        Self {
            mode: MutationMode::Set,
            fields,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Idempotency key if present and non-empty
    pub fn key(&self) -> Option<&str> {
        self.idempotency_key.as_deref().filter(|k| !k.is_empty())
    }
}

/// Summary of one changed field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
    /// Effective delta after clamping (increment mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
}

/// Per-field summary keyed by field path
pub type AppliedDeltas = BTreeMap<String, FieldChange>;

/// Result of a single-record update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub student: Document,
    pub applied_deltas: AppliedDeltas,
}

/// One applied batch item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSuccess {
    pub id: String,
    pub deltas: AppliedDeltas,
}

/// One rejected batch item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub id: String,
    pub reason: FailureReason,
    #[serde(default)]
    pub message: String,
}

/// Partial-failure result of a batch update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub succeeded: Vec<BatchSuccess>,
    pub failed: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn extend(&mut self, other: BatchOutcome) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
    }

    pub fn fail(&mut self, id: impl Into<String>, reason: FailureReason, message: impl Into<String>) {
        self.failed.push(BatchFailure {
            id: id.into(),
            reason,
            message: message.into(),
        });
    }
}

/// Which students a batch call targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchTarget {
    /// Explicit student IDs, optionally scoped to one class
    #[serde(rename_all = "camelCase")]
    Students {
        ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        class_id: Option<String>,
    },
    /// Every member of a class, resolved through the membership index
    #[serde(rename_all = "camelCase")]
    Class { class_id: String },
}

impl BatchTarget {
    pub fn students(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        BatchTarget::Students {
            ids: ids.into_iter().map(Into::into).collect(),
            class_id: None,
        }
    }

    pub fn class(class_id: impl Into<String>) -> Self {
        BatchTarget::Class {
            class_id: class_id.into(),
        }
    }

    pub fn class_id(&self) -> Option<&str> {
        match self {
            BatchTarget::Students { class_id, .. } => class_id.as_deref(),
            BatchTarget::Class { class_id } => Some(class_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_wire_shape() {
        let raw = json!({
            "mode": "increment",
            "fields": {"totalPoints": 5, "categoryTotals.reading": 2},
            "idempotencyKey": "award-17"
        });
        let descriptor: MutationDescriptor = serde_json::from_value(raw).unwrap();
        assert_eq!(descriptor.mode, MutationMode::Increment);
        assert_eq!(descriptor.key(), Some("award-17"));
        assert_eq!(descriptor.fields["categoryTotals.reading"], json!(2));
    }

    #[test]
    fn test_empty_key_is_no_key() {
        let descriptor = MutationDescriptor::increment([("currency".to_string(), 1)])
            .with_idempotency_key("");
        assert_eq!(descriptor.key(), None);
    }

    #[test]
    fn test_batch_target_wire_shape() {
        let target: BatchTarget =
            serde_json::from_value(json!({"class": {"classId": "c-1"}})).unwrap();
        assert_eq!(target.class_id(), Some("c-1"));

        let target: BatchTarget =
            serde_json::from_value(json!({"students": {"ids": ["a", "b"]}})).unwrap();
        assert_eq!(target, BatchTarget::students(["a", "b"]));
    }
}
