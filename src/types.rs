//! Shared error and result types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the engine and its collaborators
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Referenced student, class, or membership record is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller identity fails the ownership / join-code check
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Optimistic validation failed: a read document changed before commit
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed mutation descriptor or incompatible stored value
    #[error("Invalid mutation: {0}")]
    InvalidMutation(String),

    /// Backend failure that is not a validation conflict
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid runtime configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short machine-readable kind, used in HTTP error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NotFound",
            EngineError::Unauthorized(_) => "Unauthorized",
            EngineError::Conflict(_) => "Conflict",
            EngineError::InvalidMutation(_) => "InvalidMutation",
            EngineError::Store(_) => "Store",
            EngineError::Config(_) => "Config",
            EngineError::Internal(_) => "Internal",
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Internal(format!("Serialization failed: {}", e))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Internal(format!("I/O error: {}", e))
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, EngineError>;

/// Why a single batch item was not applied
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FailureReason {
    NotFound,
    Unauthorized,
    Conflict,
    InvalidMutation,
    Store,
}

impl From<&EngineError> for FailureReason {
    fn from(e: &EngineError) -> Self {
        match e {
            EngineError::NotFound(_) => FailureReason::NotFound,
            EngineError::Unauthorized(_) => FailureReason::Unauthorized,
            EngineError::Conflict(_) => FailureReason::Conflict,
            EngineError::InvalidMutation(_) => FailureReason::InvalidMutation,
            EngineError::Store(_) | EngineError::Config(_) | EngineError::Internal(_) => {
                FailureReason::Store
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_mapping() {
        assert_eq!(
            FailureReason::from(&EngineError::NotFound("s1".into())),
            FailureReason::NotFound
        );
        assert_eq!(
            FailureReason::from(&EngineError::Internal("boom".into())),
            FailureReason::Store
        );
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::Conflict("students/s1 changed".into());
        assert_eq!(err.to_string(), "Conflict: students/s1 changed");
        assert_eq!(err.kind(), "Conflict");
    }
}
