//! Graph node and edge value types.
//!
//! # Invariants
//! - `Event` and `Entity` are immutable once ingested.
//! - A `DfEdge` is identified by `(source event, target event, owning entity)`;
//!   two edges between the same events may coexist when owned by different
//!   entities.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Natural identifier of an event node.
pub type EventId = String;

/// Natural identifier of an entity (object) node.
pub type EntityId = String;

/// Ingested event node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub activity: String,
    /// Unix epoch milliseconds.
    pub timestamp_ms: i64,
    /// Position in ingestion order, assigned by the store on first insert.
    pub seq: i64,
}

impl Event {
    /// Chronological sort key: timestamp first, ingestion order on ties.
    pub fn order_key(&self) -> (i64, i64) {
        (self.timestamp_ms, self.seq)
    }
}

/// Event awaiting its ingestion sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub id: EventId,
    pub activity: String,
    pub timestamp_ms: i64,
}

/// Ingested entity node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Entity {
    pub fn new(id: impl Into<EntityId>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            attributes: BTreeMap::new(),
        }
    }
}

/// CORR: event is correlated to entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrEdge {
    pub event_id: EventId,
    pub entity_id: EntityId,
}

/// REL: structural entity-to-entity relation with a qualifier label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelEdge {
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub qualifier: String,
}

/// DERIVED: `derived_id` is an abstracted view of `base_id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DerivedEdge {
    pub derived_id: EntityId,
    pub base_id: EntityId,
}

/// Identity of a directly-follows edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DfEdgeKey {
    pub source_event_id: EventId,
    pub target_event_id: EventId,
    pub entity_id: EntityId,
}

/// DF: `source` immediately precedes `target` in the owning entity's trace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DfEdge {
    pub source_event_id: EventId,
    pub target_event_id: EventId,
    pub entity_id: EntityId,
    pub entity_type: String,
}

impl DfEdge {
    pub fn key(&self) -> DfEdgeKey {
        DfEdgeKey {
            source_event_id: self.source_event_id.clone(),
            target_event_id: self.target_event_id.clone(),
            entity_id: self.entity_id.clone(),
        }
    }
}

/// Node and edge counts of a stored graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphSummary {
    pub events: u64,
    pub entities: u64,
    pub corr_edges: u64,
    pub rel_edges: u64,
    pub derived_edges: u64,
    pub df_edges: u64,
}
