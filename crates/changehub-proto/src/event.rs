//! Domain events carried by the hub.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Types of changes that can occur to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// A new entity was created.
    Create,
    /// An existing entity was updated.
    Update,
    /// An entity was deleted.
    Delete,
}

impl Operation {
    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DecodeError;

    /// Parse an operation name. Trigger-style `INSERT` is accepted as an
    /// alias for `CREATE`; matching ignores ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("create") || s.eq_ignore_ascii_case("insert") {
            Ok(Operation::Create)
        } else if s.eq_ignore_ascii_case("update") {
            Ok(Operation::Update)
        } else if s.eq_ignore_ascii_case("delete") {
            Ok(Operation::Delete)
        } else {
            Err(DecodeError::MalformedPayload(format!(
                "unsupported operation '{}'",
                s
            )))
        }
    }
}

/// A decoded change notification for one entity.
///
/// Events are immutable once decoded; the hub shares a single allocation
/// between all subscribers of a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Topic (entity type) the event belongs to.
    pub topic: String,
    /// The type of change.
    pub operation: Operation,
    /// Identifier of the changed entity.
    pub entity_id: String,
    /// The entity data as delivered by the upstream source.
    pub payload: serde_json::Value,
}

impl DomainEvent {
    /// Create a new domain event.
    pub fn new(
        topic: impl Into<String>,
        operation: Operation,
        entity_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            operation,
            entity_id: entity_id.into(),
            payload,
        }
    }

    /// Serialize the event as a single JSON line, suitable for one
    /// server-push frame.
    pub fn to_json(&self) -> String {
        // Serializing a struct of strings and a Value cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
