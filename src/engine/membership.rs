//! Class membership index
//!
//! One `memberships/<classId>` record per class holds the student ID set.
//! It is only written inside the transaction that creates a student, and the
//! same transaction rewrites `Class.studentCount` from the set's size, so the
//! two can never be observed out of sync.
//!
//! Rosters created before the index existed are read through the
//! `ScanStudents` strategy, chosen once at startup.

use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::db::schemas::{from_document, to_document, MembershipDoc};
use crate::db::{Collection, Document, RecordKey, RecordStore, Transaction};
use crate::types::{EngineError, Result};

/// How `members()` resolves a class roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MembershipStrategy {
    /// Read the membership index record
    #[default]
    Indexed,
    /// Scan student documents by `classId` (pre-index data)
    ScanStudents,
}

impl FromStr for MembershipStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "indexed" => Ok(MembershipStrategy::Indexed),
            "scan-students" | "scan" => Ok(MembershipStrategy::ScanStudents),
            other => Err(format!(
                "unknown membership strategy '{}' (expected 'indexed' or 'scan-students')",
                other
            )),
        }
    }
}

impl fmt::Display for MembershipStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MembershipStrategy::Indexed => write!(f, "indexed"),
            MembershipStrategy::ScanStudents => write!(f, "scan-students"),
        }
    }
}

#[derive(Clone)]
pub struct ClassMembershipIndex {
    store: Arc<dyn RecordStore>,
    strategy: MembershipStrategy,
}

impl ClassMembershipIndex {
    pub fn new(store: Arc<dyn RecordStore>, strategy: MembershipStrategy) -> Self {
        Self { store, strategy }
    }

    /// Add `student_id` to the class roster inside `tx`.
    ///
    /// Also rewrites the class's `studentCount` from the roster size, leaving
    /// every other class field alone. Returns the new count.
    pub async fn add_member(
        &self,
        tx: &mut Transaction<'_>,
        class_id: &str,
        student_id: &str,
    ) -> Result<u64> {
        let class_key = RecordKey::class(class_id);
        if tx.get(&class_key).await?.is_none() {
            return Err(EngineError::NotFound(format!("class {}", class_id)));
        }

        let membership_key = RecordKey::membership(class_id);
        let mut membership = match tx.get(&membership_key).await? {
            Some(doc) => from_document::<MembershipDoc>(&doc)?,
            None => MembershipDoc::new(class_id.to_string()),
        };

        membership.student_ids.insert(student_id.to_string());
        let student_count = membership.student_ids.len() as u64;

        let mut count = Document::new();
        count.insert("studentCount".to_string(), Value::from(student_count));

        tx.set(membership_key, to_document(&membership)?);
        tx.update(class_key, count);

        debug!(
            class_id = %class_id,
            student_id = %student_id,
            student_count,
            "Membership entry buffered"
        );

        Ok(student_count)
    }

    /// Current roster of a class
    pub async fn members(&self, class_id: &str) -> Result<BTreeSet<String>> {
        match self.strategy {
            MembershipStrategy::Indexed => {
                let found = self
                    .store
                    .get(&RecordKey::membership(class_id))
                    .await?
                    .ok_or_else(|| {
                        EngineError::NotFound(format!("membership index for class {}", class_id))
                    })?;
                let membership: MembershipDoc = from_document(&found.doc)?;
                Ok(membership.student_ids)
            }
            MembershipStrategy::ScanStudents => {
                let students = self
                    .store
                    .find_by_field(
                        Collection::Students,
                        "classId",
                        &Value::String(class_id.to_string()),
                    )
                    .await?;
                Ok(students.into_iter().map(|(id, _)| id).collect())
            }
        }
    }
}
