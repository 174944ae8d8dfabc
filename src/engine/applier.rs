//! Mutation applier
//!
//! Pure computation of a student's next state. No I/O, no side effects: safe
//! to run speculatively and inside any transaction attempt.
//!
//! - `increment`: each field resolves to an integer (missing ⇒ 0), the delta
//!   is added with saturation and the result is floored at zero.
//! - `set`: each field is replaced verbatim.
//!
//! Field names may be dotted paths (`categoryTotals.reading`); missing
//! intermediate objects are created.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::mutation::{AppliedDeltas, FieldChange, MutationDescriptor, MutationMode};
use crate::db::Document;
use crate::types::{EngineError, Result};

/// Fields that identify a student and may not be rewritten
pub const PROTECTED_FIELDS: &[&str] = &["id", "classId"];

pub const UPDATED_AT: &str = "updatedAt";
pub const LAST_ACTIVITY: &str = "lastActivity";

/// Next document state plus the per-field summary
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMutation {
    pub doc: Document,
    pub deltas: AppliedDeltas,
}

/// Apply `mutation` to `current`, stamping `updatedAt` / `lastActivity` with `now`
pub fn apply_mutation(
    current: &Document,
    mutation: &MutationDescriptor,
    now: DateTime<Utc>,
) -> Result<AppliedMutation> {
    if mutation.fields.is_empty() {
        return Err(EngineError::InvalidMutation(
            "mutation names no fields".to_string(),
        ));
    }

    let mut doc = current.clone();
    let mut deltas = AppliedDeltas::new();

    for (field, value) in &mutation.fields {
        let path = parse_path(field)?;

        let change = match mutation.mode {
            MutationMode::Increment => {
                let delta = value.as_i64().ok_or_else(|| {
                    EngineError::InvalidMutation(format!(
                        "increment for '{}' must be an integer, got {}",
                        field, value
                    ))
                })?;

                let old = match get_path(&doc, &path) {
                    None | Some(Value::Null) => 0,
                    Some(existing) => existing.as_i64().ok_or_else(|| {
                        EngineError::InvalidMutation(format!(
                            "field '{}' holds non-integer value {}",
                            field, existing
                        ))
                    })?,
                };

                let new = old.saturating_add(delta).max(0);
                set_path(&mut doc, &path, Value::from(new), field)?;

                FieldChange {
                    old: Value::from(old),
                    new: Value::from(new),
                    delta: Some(new.saturating_sub(old)),
                }
            }
            MutationMode::Set => {
                let old = get_path(&doc, &path).cloned().unwrap_or(Value::Null);
                set_path(&mut doc, &path, value.clone(), field)?;

                FieldChange {
                    old,
                    new: value.clone(),
                    delta: None,
                }
            }
        };

        deltas.insert(field.clone(), change);
    }

    let stamp = serde_json::to_value(now)?;
    doc.insert(UPDATED_AT.to_string(), stamp.clone());
    doc.insert(LAST_ACTIVITY.to_string(), stamp);

    Ok(AppliedMutation { doc, deltas })
}

fn parse_path(field: &str) -> Result<Vec<&str>> {
    let path: Vec<&str> = field.split('.').collect();

    if path.iter().any(|segment| segment.is_empty()) {
        return Err(EngineError::InvalidMutation(format!(
            "malformed field path '{}'",
            field
        )));
    }

    if PROTECTED_FIELDS.contains(&path[0]) {
        return Err(EngineError::InvalidMutation(format!(
            "field '{}' cannot be mutated",
            field
        )));
    }

    Ok(path)
}

fn get_path<'d>(doc: &'d Document, path: &[&str]) -> Option<&'d Value> {
    let (first, rest) = path.split_first()?;
    let mut current = doc.get(*first)?;
    for segment in rest {
        current = current.as_object()?.get(*segment)?;
    }
    Some(current)
}

fn set_path(doc: &mut Document, path: &[&str], value: Value, field: &str) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        return Ok(());
    };

    let mut current = doc;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Document::new()));
        if slot.is_null() {
            *slot = Value::Object(Document::new());
        }
        current = slot.as_object_mut().ok_or_else(|| {
            EngineError::InvalidMutation(format!(
                "cannot address '{}': '{}' is not an object",
                field, segment
            ))
        })?;
    }

    current.insert(last.to_string(), value);
    Ok(())
}
