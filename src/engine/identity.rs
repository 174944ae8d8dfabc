//! Caller identity and class ownership policy
//!
//! Authentication happens upstream; the engine only checks that an already
//! verified identity owns the class (teacher ID) or presents its join code.

use serde::{Deserialize, Serialize};

use crate::db::schemas::ClassDoc;

/// Verified caller identity supplied with every request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_code: Option<String>,
}

impl CallerIdentity {
    pub fn teacher(teacher_id: impl Into<String>) -> Self {
        Self {
            teacher_id: Some(teacher_id.into()),
            class_code: None,
        }
    }

    pub fn with_class_code(class_code: impl Into<String>) -> Self {
        Self {
            teacher_id: None,
            class_code: Some(class_code.into()),
        }
    }

    /// Short form for log fields
    pub fn describe(&self) -> String {
        match (&self.teacher_id, &self.class_code) {
            (Some(t), _) => format!("teacher:{}", t),
            (None, Some(_)) => "class-code".to_string(),
            (None, None) => "anonymous".to_string(),
        }
    }
}

/// Ownership check collaborator
pub trait AccessPolicy: Send + Sync {
    fn authorize(&self, class: &ClassDoc, caller: &CallerIdentity) -> bool;
}

/// Teacher ID or class join code must match the class record
#[derive(Debug, Default, Clone, Copy)]
pub struct ClassOwnership;

impl AccessPolicy for ClassOwnership {
    fn authorize(&self, class: &ClassDoc, caller: &CallerIdentity) -> bool {
        let teacher_match = caller
            .teacher_id
            .as_deref()
            .is_some_and(|t| !t.is_empty() && t == class.teacher_id);

        let code_match = match (caller.class_code.as_deref(), class.class_code.as_deref()) {
            (Some(given), Some(expected)) => !given.is_empty() && given == expected,
            _ => false,
        };

        teacher_match || code_match
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class() -> ClassDoc {
        ClassDoc {
            id: "c-1".into(),
            teacher_id: "t-1".into(),
            class_code: Some("JOIN42".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_teacher_owns_class() {
        let policy = ClassOwnership;
        assert!(policy.authorize(&class(), &CallerIdentity::teacher("t-1")));
        assert!(!policy.authorize(&class(), &CallerIdentity::teacher("t-2")));
    }

    #[test]
    fn test_class_code_authorizes() {
        let policy = ClassOwnership;
        assert!(policy.authorize(&class(), &CallerIdentity::with_class_code("JOIN42")));
        assert!(!policy.authorize(&class(), &CallerIdentity::with_class_code("WRONG")));
    }

    #[test]
    fn test_empty_identity_rejected() {
        let policy = ClassOwnership;
        let mut open = class();
        open.teacher_id = String::new();
        open.class_code = None;
        assert!(!policy.authorize(&open, &CallerIdentity::default()));
        assert!(!policy.authorize(&open, &CallerIdentity::teacher("")));
    }
}
