//! Document schemas
//!
//! Typed views over the JSON documents held by the record store.

mod class;
mod idempotency;
mod membership;
mod student;

pub use class::ClassDoc;
pub use idempotency::IdempotencyDoc;
pub use membership::MembershipDoc;
pub use student::StudentDoc;

use serde::{de::DeserializeOwned, Serialize};

use crate::db::Document;
use crate::types::{EngineError, Result};

/// Serialize a typed schema into a store document
pub fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(EngineError::Internal(format!(
            "Expected a JSON object, got {}",
            other
        ))),
    }
}

/// Decode a store document into a typed schema
pub fn from_document<T: DeserializeOwned>(doc: &Document) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(doc.clone()))
        .map_err(|e| EngineError::Store(format!("Malformed document: {}", e)))
}
