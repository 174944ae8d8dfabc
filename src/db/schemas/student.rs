//! Student document schema
//!
//! Game-progress blobs and any other caller-defined fields are kept in
//! `extra` untouched; the engine replaces them wholesale and never merges
//! inside them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::Document;

/// Student document stored under `students/<id>`
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentDoc {
    /// Student identifier (mirrors the record key)
    pub id: String,

    /// Owning class, immutable after creation
    pub class_id: String,

    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Experience points, never negative
    #[serde(default)]
    pub total_points: i64,

    /// Spendable currency, never negative
    #[serde(default)]
    pub currency: i64,

    /// Per-category point totals, keys created lazily
    #[serde(default)]
    pub category_totals: BTreeMap<String, i64>,

    /// Archival flag (students are never hard-deleted)
    #[serde(default)]
    pub archived: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,

    /// Opaque game-progress blobs
    #[serde(flatten)]
    pub extra: Document,
}

impl StudentDoc {
    /// New student with a zero points/currency baseline
    pub fn new(id: String, class_id: String, name: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            class_id,
            name,
            total_points: 0,
            currency: 0,
            category_totals: BTreeMap::new(),
            archived: false,
            created_at: Some(now),
            updated_at: Some(now),
            last_activity: Some(now),
            extra: Document::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{from_document, to_document};
    use serde_json::json;

    #[test]
    fn test_student_round_trips_unknown_fields() {
        let raw = json!({
            "id": "s-1",
            "classId": "c-1",
            "totalPoints": 40,
            "petState": {"hunger": 3, "level": 2}
        });
        let doc = raw.as_object().cloned().unwrap();

        let student: StudentDoc = from_document(&doc).unwrap();
        assert_eq!(student.total_points, 40);
        assert_eq!(student.currency, 0);
        assert!(student.category_totals.is_empty());
        assert_eq!(student.extra["petState"]["level"], json!(2));

        let back = to_document(&student).unwrap();
        assert_eq!(back["petState"], raw["petState"]);
        assert_eq!(back["classId"], json!("c-1"));
    }
}
