//! Class document schema

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Document;

/// Class document stored under `classes/<id>`
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassDoc {
    pub id: String,

    /// Ownership key: the teacher who may mutate this class and its students
    pub teacher_id: String,

    /// Join code; presenting it also authorizes the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_code: Option<String>,

    #[serde(default)]
    pub name: String,

    /// Derived from the membership index, updated in the same transaction
    #[serde(default)]
    pub student_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,

    /// Fields this service does not model, kept as written
    #[serde(flatten)]
    pub extra: Document,
}

impl ClassDoc {
    pub fn new(
        id: String,
        teacher_id: String,
        name: String,
        class_code: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            teacher_id,
            class_code,
            name,
            student_count: 0,
            created_at: Some(now),
            last_activity: Some(now),
            extra: Document::new(),
        }
    }
}
