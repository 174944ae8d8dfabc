//! Class membership index schema

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Membership record stored under `memberships/<classId>`
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MembershipDoc {
    pub class_id: String,

    /// Student IDs belonging to the class; order is irrelevant
    #[serde(default)]
    pub student_ids: BTreeSet<String>,
}

impl MembershipDoc {
    pub fn new(class_id: String) -> Self {
        Self {
            class_id,
            student_ids: BTreeSet::new(),
        }
    }
}
