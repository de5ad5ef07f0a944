//! Point-in-time graph snapshot and referential integrity checks.
//!
//! # Responsibility
//! - Load nodes and edges once so derived computations see one consistent
//!   view of the store.
//! - Reject partial graphs: any edge pointing at a missing node is a
//!   `ReferenceError`, never silently skipped.

use crate::model::graph::{CorrEdge, DerivedEdge, DfEdge, Entity, EntityId, Event, EventId, RelEdge};
use crate::repo::graph_repo::{DfEdgeFilter, GraphStore, StoreResult};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Corr,
    Rel,
    Derived,
    Df,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Corr => "CORR",
            Self::Rel => "REL",
            Self::Derived => "DERIVED",
            Self::Df => "DF",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingNode {
    Event(EventId),
    Entity(EntityId),
}

/// An edge references a node that does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceError {
    pub edge_kind: EdgeKind,
    /// Human-readable edge identity, e.g. `e1 -> o1`.
    pub edge: String,
    pub missing: MissingNode,
}

impl Display for ReferenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (kind, id) = match &self.missing {
            MissingNode::Event(id) => ("event", id),
            MissingNode::Entity(id) => ("entity", id),
        };
        write!(
            f,
            "{} edge {} references missing {kind} `{id}`",
            self.edge_kind.as_str(),
            self.edge
        )
    }
}

impl Error for ReferenceError {}

/// All nodes and edges read from the store at one point in time.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    pub events: HashMap<EventId, Event>,
    pub entities: HashMap<EntityId, Entity>,
    pub corr_edges: Vec<CorrEdge>,
    pub rel_edges: Vec<RelEdge>,
    pub derived_edges: Vec<DerivedEdge>,
    pub df_edges: Vec<DfEdge>,
}

impl GraphSnapshot {
    pub fn load(store: &impl GraphStore) -> StoreResult<Self> {
        Ok(Self {
            events: store
                .list_events()?
                .into_iter()
                .map(|event| (event.id.clone(), event))
                .collect(),
            entities: store
                .list_entities()?
                .into_iter()
                .map(|entity| (entity.id.clone(), entity))
                .collect(),
            corr_edges: store.list_corr_edges()?,
            rel_edges: store.list_rel_edges()?,
            derived_edges: store.list_derived_edges()?,
            df_edges: store.list_df_edges(&DfEdgeFilter::default())?,
        })
    }

    /// Checks CORR edges only; enough for building directly-follows traces.
    pub fn verify_correlations(&self) -> Result<(), ReferenceError> {
        for edge in &self.corr_edges {
            let describe = || format!("{} -> {}", edge.event_id, edge.entity_id);
            self.require_event(&edge.event_id, EdgeKind::Corr, describe)?;
            self.require_entity(&edge.entity_id, EdgeKind::Corr, describe)?;
        }
        Ok(())
    }

    /// Checks every edge family.
    pub fn verify_references(&self) -> Result<(), ReferenceError> {
        self.verify_correlations()?;

        for edge in &self.rel_edges {
            let describe = || {
                format!(
                    "{} -[{}]-> {}",
                    edge.source_id, edge.qualifier, edge.target_id
                )
            };
            self.require_entity(&edge.source_id, EdgeKind::Rel, describe)?;
            self.require_entity(&edge.target_id, EdgeKind::Rel, describe)?;
        }

        for edge in &self.derived_edges {
            let describe = || format!("{} -> {}", edge.derived_id, edge.base_id);
            self.require_entity(&edge.derived_id, EdgeKind::Derived, describe)?;
            self.require_entity(&edge.base_id, EdgeKind::Derived, describe)?;
        }

        for edge in &self.df_edges {
            let describe = || {
                format!(
                    "{} -> {} [{}]",
                    edge.source_event_id, edge.target_event_id, edge.entity_id
                )
            };
            self.require_event(&edge.source_event_id, EdgeKind::Df, describe)?;
            self.require_event(&edge.target_event_id, EdgeKind::Df, describe)?;
            self.require_entity(&edge.entity_id, EdgeKind::Df, describe)?;
        }

        Ok(())
    }

    fn require_event(
        &self,
        id: &str,
        edge_kind: EdgeKind,
        describe: impl Fn() -> String,
    ) -> Result<(), ReferenceError> {
        if self.events.contains_key(id) {
            return Ok(());
        }
        Err(ReferenceError {
            edge_kind,
            edge: describe(),
            missing: MissingNode::Event(id.to_string()),
        })
    }

    fn require_entity(
        &self,
        id: &str,
        edge_kind: EdgeKind,
        describe: impl Fn() -> String,
    ) -> Result<(), ReferenceError> {
        if self.entities.contains_key(id) {
            return Ok(());
        }
        Err(ReferenceError {
            edge_kind,
            edge: describe(),
            missing: MissingNode::Entity(id.to_string()),
        })
    }
}
