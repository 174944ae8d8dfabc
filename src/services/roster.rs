//! Roster management
//!
//! Creates the classes and students the update engine mutates. Student
//! creation writes the student, its membership entry and the class's
//! `studentCount` in one transaction. Students are archived, never deleted.

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::schemas::{to_document, ClassDoc, MembershipDoc, StudentDoc};
use crate::db::{Document, RecordKey, RecordStore, Transaction};
use crate::engine::applier::UPDATED_AT;
use crate::engine::{load_class, student_class_id};
use crate::engine::{AccessPolicy, CallerIdentity, ClassMembershipIndex, Clock};
use crate::types::{EngineError, Result};

/// Attempts for a student creation that keeps losing the membership race
const CREATE_STUDENT_ATTEMPTS: u32 = 5;

pub struct RosterService {
    store: Arc<dyn RecordStore>,
    policy: Arc<dyn AccessPolicy>,
    clock: Arc<dyn Clock>,
    index: ClassMembershipIndex,
}

impl RosterService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        policy: Arc<dyn AccessPolicy>,
        clock: Arc<dyn Clock>,
        index: ClassMembershipIndex,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
            index,
        }
    }

    /// Create a class owned by the calling teacher, with an empty roster
    pub async fn create_class(
        &self,
        caller: &CallerIdentity,
        name: &str,
        class_code: Option<String>,
    ) -> Result<ClassDoc> {
        let teacher_id = caller
            .teacher_id
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EngineError::Unauthorized("creating a class requires a teacher".into()))?;

        let class = ClassDoc::new(
            Uuid::new_v4().to_string(),
            teacher_id.to_string(),
            name.to_string(),
            class_code.filter(|c| !c.is_empty()),
            self.clock.now(),
        );

        let mut tx = Transaction::begin(self.store.as_ref());
        tx.set(RecordKey::class(class.id.as_str()), to_document(&class)?);
        tx.set(
            RecordKey::membership(class.id.as_str()),
            to_document(&MembershipDoc::new(class.id.clone()))?,
        );
        tx.commit().await?;

        info!(class_id = %class.id, teacher_id = %teacher_id, "Class created");
        Ok(class)
    }

    /// Create a student in `class_id` and add it to the class roster
    pub async fn create_student(
        &self,
        class_id: &str,
        name: Option<String>,
        caller: &CallerIdentity,
    ) -> Result<StudentDoc> {
        self.authorized_class(class_id, caller).await?;

        let mut attempt = 1;
        loop {
            match self.try_create_student(class_id, name.clone()).await {
                Err(EngineError::Conflict(reason)) if attempt < CREATE_STUDENT_ATTEMPTS => {
                    debug!(class_id = %class_id, attempt, reason = %reason, "Student creation raced, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn try_create_student(&self, class_id: &str, name: Option<String>) -> Result<StudentDoc> {
        let student = StudentDoc::new(
            Uuid::new_v4().to_string(),
            class_id.to_string(),
            name,
            self.clock.now(),
        );

        let mut tx = Transaction::begin(self.store.as_ref());
        tx.set(RecordKey::student(student.id.as_str()), to_document(&student)?);
        let student_count = self.index.add_member(&mut tx, class_id, &student.id).await?;
        tx.commit().await?;

        info!(
            student_id = %student.id,
            class_id = %class_id,
            student_count,
            "Student created"
        );
        Ok(student)
    }

    /// Mark a student archived. Archival is terminal and idempotent.
    pub async fn archive_student(&self, student_id: &str, caller: &CallerIdentity) -> Result<Document> {
        self.get_student(student_id, caller).await?;

        let key = RecordKey::student(student_id);
        let mut tx = Transaction::begin(self.store.as_ref());
        let mut student = tx
            .get(&key)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("student {}", student_id)))?;

        if student.get("archived") == Some(&Value::Bool(true)) {
            return Ok(student);
        }

        student.insert("archived".to_string(), Value::Bool(true));
        student.insert(UPDATED_AT.to_string(), serde_json::to_value(self.clock.now())?);
        tx.set(key, student.clone());
        tx.commit().await?;

        info!(student_id = %student_id, "Student archived");
        Ok(student)
    }

    /// Student snapshot, for callers authorized on its class
    pub async fn get_student(&self, student_id: &str, caller: &CallerIdentity) -> Result<Document> {
        let student = self
            .store
            .get(&RecordKey::student(student_id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("student {}", student_id)))?;

        self.authorized_class(student_class_id(&student.doc)?, caller)
            .await?;
        Ok(student.doc)
    }

    pub async fn get_class(&self, class_id: &str, caller: &CallerIdentity) -> Result<ClassDoc> {
        self.authorized_class(class_id, caller).await
    }

    pub async fn members(&self, class_id: &str, caller: &CallerIdentity) -> Result<BTreeSet<String>> {
        self.authorized_class(class_id, caller).await?;
        self.index.members(class_id).await
    }

    async fn authorized_class(&self, class_id: &str, caller: &CallerIdentity) -> Result<ClassDoc> {
        let class = load_class(self.store.as_ref(), class_id).await?;
        if !self.policy.authorize(&class, caller) {
            return Err(EngineError::Unauthorized(format!(
                "{} has no access to class {}",
                caller.describe(),
                class_id
            )));
        }
        Ok(class)
    }
}
