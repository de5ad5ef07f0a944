//! Log records consumed by the materializer.
//!
//! # Responsibility
//! - Describe the already-parsed shape of an object-centric event log.
//! - Turn records into graph values, rejecting records with missing fields.
//!
//! # Invariants
//! - Required fields are `Option` so a missing field is a validation failure,
//!   not a decode failure.
//! - Blank (whitespace-only) strings count as missing.

use crate::model::graph::{DerivedEdge, Entity, EntityId, EventDraft, RelEdge};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One load unit from the log source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogBatch {
    #[serde(default)]
    pub events: Vec<EventRecord>,
    #[serde(default)]
    pub objects: Vec<ObjectRecord>,
    /// Object-to-object qualifier relations.
    #[serde(default)]
    pub relations: Vec<RelationRecord>,
    #[serde(default)]
    pub derivations: Vec<DerivationRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Option<String>,
    pub activity: Option<String>,
    /// Unix epoch milliseconds.
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub correlated: Vec<EntityId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub object_type: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub source: Option<String>,
    pub target: Option<String>,
    pub qualifier: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationRecord {
    pub derived: Option<String>,
    pub base: Option<String>,
}

/// Record family, used to locate rejected records in reports and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Event,
    Object,
    Relation,
    Derivation,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Object => "object",
            Self::Relation => "relation",
            Self::Derivation => "derivation",
        }
    }
}

/// Record-level rejection. Fatal for the record only; the batch continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingField {
        record: RecordKind,
        field: &'static str,
    },
    UnknownEntity {
        record: RecordKind,
        entity_id: EntityId,
    },
    /// Accepting `derived -> base` would close a cycle in the DERIVED graph.
    /// A self-loop is the one-edge case.
    CyclicDerivation {
        derived: EntityId,
        base: EntityId,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField { record, field } => {
                write!(f, "{} record is missing required field `{field}`", record.as_str())
            }
            Self::UnknownEntity { record, entity_id } => write!(
                f,
                "{} record references unknown entity `{entity_id}`",
                record.as_str()
            ),
            Self::CyclicDerivation { derived, base } => write!(
                f,
                "derivation `{derived}` -> `{base}` would create a derivation cycle"
            ),
        }
    }
}

impl Error for ValidationError {}

impl EventRecord {
    /// Validates required fields and returns the event plus its correlated
    /// entity ids, deduplicated in first-seen order with blanks dropped.
    pub fn validate(&self) -> Result<(EventDraft, Vec<EntityId>), ValidationError> {
        let id = required(&self.id, RecordKind::Event, "id")?;
        let activity = required(&self.activity, RecordKind::Event, "activity")?;
        let timestamp_ms = self.timestamp.ok_or(ValidationError::MissingField {
            record: RecordKind::Event,
            field: "timestamp",
        })?;

        let mut seen = HashSet::new();
        let correlated = self
            .correlated
            .iter()
            .map(|entity_id| entity_id.trim())
            .filter(|entity_id| !entity_id.is_empty() && seen.insert(*entity_id))
            .map(str::to_string)
            .collect();

        Ok((
            EventDraft {
                id,
                activity,
                timestamp_ms,
            },
            correlated,
        ))
    }
}

impl ObjectRecord {
    pub fn validate(&self) -> Result<Entity, ValidationError> {
        let id = required(&self.id, RecordKind::Object, "id")?;
        let entity_type = required(&self.object_type, RecordKind::Object, "type")?;
        Ok(Entity {
            id,
            entity_type,
            attributes: self.attributes.clone(),
        })
    }
}

impl RelationRecord {
    pub fn validate(&self) -> Result<RelEdge, ValidationError> {
        Ok(RelEdge {
            source_id: required(&self.source, RecordKind::Relation, "source")?,
            target_id: required(&self.target, RecordKind::Relation, "target")?,
            qualifier: required(&self.qualifier, RecordKind::Relation, "qualifier")?,
        })
    }
}

impl DerivationRecord {
    pub fn validate(&self) -> Result<DerivedEdge, ValidationError> {
        let derived_id = required(&self.derived, RecordKind::Derivation, "derived")?;
        let base_id = required(&self.base, RecordKind::Derivation, "base")?;
        if derived_id == base_id {
            return Err(ValidationError::CyclicDerivation {
                derived: derived_id,
                base: base_id,
            });
        }
        Ok(DerivedEdge {
            derived_id,
            base_id,
        })
    }
}

fn required(
    value: &Option<String>,
    record: RecordKind,
    field: &'static str,
) -> Result<String, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => Ok(trimmed.to_string()),
        _ => Err(ValidationError::MissingField { record, field }),
    }
}
