//! Static checks on entity declarations.
//!
//! Run these once at startup (or in a test) over every entity the
//! application registers. They catch declarations that compile fine but
//! silently lose batching or contradict their own metadata.

use std::fmt;

use serde::Serialize;

use peerload_core::{BaseManager, Entity, ReferentialAction};

/// Severity of a [`CheckMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckLevel {
    Warning,
    Error,
}

/// One finding from [`check_entity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckMessage {
    /// Stable identifier, e.g. `peerload.E001`
    pub id: &'static str,
    pub level: CheckLevel,
    /// Table of the offending entity
    pub object: &'static str,
    pub message: String,
    pub hint: Option<String>,
}

impl CheckMessage {
    pub fn is_error(&self) -> bool {
        self.level == CheckLevel::Error
    }
}

impl fmt::Display for CheckMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ({}) {}", self.object, self.id, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n\tHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Check one entity declaration.
///
/// - `peerload.E001`: the base manager is not [`BaseManager::Tracking`], so
///   relation targets fetched for this entity never batch.
/// - `peerload.E002`: a relation in `RELATIONSHIPS` names a key column that
///   `fields()` does not declare (skipped when `fields()` is empty).
/// - `peerload.E003`: a relation deletes with `SET NULL` but is not nullable.
pub fn check_entity<M: Entity>() -> Vec<CheckMessage> {
    let mut messages = Vec::new();
    let type_name = short_type_name::<M>();

    if M::BASE_MANAGER != BaseManager::Tracking {
        messages.push(CheckMessage {
            id: "peerload.E001",
            level: CheckLevel::Error,
            object: M::TABLE_NAME,
            message: format!(
                "`{}` implements Entity but its base manager is not the tracking manager",
                type_name
            ),
            hint: Some(format!(
                "The base manager is instead `{}`. Set `BASE_MANAGER = BaseManager::Tracking` \
                 or drop the override to use the default.",
                M::BASE_MANAGER.name()
            )),
        });
    }

    let fields = M::fields();
    for relation in M::RELATIONSHIPS {
        if relation.source_table != M::TABLE_NAME {
            continue;
        }

        if relation.kind.is_forward()
            && !fields.is_empty()
            && !fields.iter().any(|f| f.column_name == relation.column)
        {
            messages.push(CheckMessage {
                id: "peerload.E002",
                level: CheckLevel::Error,
                object: M::TABLE_NAME,
                message: format!(
                    "relation '{}' uses key column '{}', which `{}` does not declare",
                    relation.name, relation.column, type_name
                ),
                hint: Some("Add the column to `fields()` or fix the relation's column.".to_string()),
            });
        }

        if relation.on_delete == ReferentialAction::SetNull && !relation.nullable {
            messages.push(CheckMessage {
                id: "peerload.E003",
                level: CheckLevel::Error,
                object: M::TABLE_NAME,
                message: format!(
                    "relation '{}' deletes with SET NULL but is not nullable",
                    relation.name
                ),
                hint: Some("Mark the relation `.nullable(true)` or pick another action.".to_string()),
            });
        }
    }

    if !messages.is_empty() {
        tracing::debug!(
            target: "peerload::checks",
            entity = M::TABLE_NAME,
            findings = messages.len(),
            "entity check reported problems"
        );
    }

    messages
}

fn short_type_name<M>() -> &'static str {
    let full = std::any::type_name::<M>();
    full.rsplit("::").next().unwrap_or(full)
}
