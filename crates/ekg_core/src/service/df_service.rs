//! Per-entity directly-follows construction.
//!
//! # Responsibility
//! - Group events by correlated entity and order each group chronologically.
//! - Emit one DF edge per consecutive event pair, owned by that entity.
//!
//! # Invariants
//! - Ordering is `(timestamp, ingestion seq)`; identifiers never break ties.
//! - For every entity, emitted edges are exactly the consecutive pairs of its
//!   ordered events: no skipped pairs, duplicates or self-loops.
//! - Writes are idempotent on `(source, target, entity_id)`, so re-running
//!   construction or racing another writer never duplicates an edge.
//! - Stored edges an entity no longer links consecutively (an event landed
//!   between them in a later batch) are removed in the same transaction.

use crate::model::graph::{DfEdge, Entity, Event};
use crate::pool::WorkerPool;
use crate::repo::graph_repo::{GraphStore, StoreError};
use crate::retry::{with_retry, RetryPolicy};
use crate::service::integrity::{GraphSnapshot, ReferenceError};
use log::{error, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

#[derive(Debug, Clone, Copy, Default)]
pub struct DfOptions {
    pub pool: WorkerPool,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DfReport {
    /// Entities with at least one correlated event.
    pub entities_seen: usize,
    pub edges_emitted: usize,
    /// Edges not already present in the store.
    pub edges_inserted: usize,
    /// Stored edges whose events are no longer consecutive.
    pub edges_removed: usize,
}

#[derive(Debug)]
pub enum DfError {
    Reference(ReferenceError),
    Store(StoreError),
}

impl Display for DfError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reference(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DfError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Reference(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<ReferenceError> for DfError {
    fn from(value: ReferenceError) -> Self {
        Self::Reference(value)
    }
}

impl From<StoreError> for DfError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// One entity with its correlated events, in no particular order.
#[derive(Debug, Clone)]
pub struct EntityEvents<'a> {
    pub entity: &'a Entity,
    pub events: Vec<&'a Event>,
}

pub struct DfConstructor<S: GraphStore> {
    store: S,
    options: DfOptions,
}

impl<S: GraphStore> DfConstructor<S> {
    pub fn new(store: S, options: DfOptions) -> Self {
        Self { store, options }
    }

    /// Builds DF edges for every entity in the store.
    pub fn construct(&self) -> Result<DfReport, DfError> {
        let started_at = Instant::now();
        info!("event=df_construct module=df status=start");

        match self.construct_inner() {
            Ok(report) => {
                info!(
                    "event=df_construct module=df status=ok duration_ms={} entities={} emitted={} inserted={} removed={}",
                    started_at.elapsed().as_millis(),
                    report.entities_seen,
                    report.edges_emitted,
                    report.edges_inserted,
                    report.edges_removed
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    "event=df_construct module=df status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn construct_inner(&self) -> Result<DfReport, DfError> {
        let snapshot = GraphSnapshot::load(&self.store)?;
        snapshot.verify_correlations()?;

        let groups = group_by_entity(&snapshot);
        let edges = self
            .options
            .pool
            .map(&groups, |group| trace_edges(group.entity, &group.events))
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        let owners = snapshot.entities.keys().cloned().collect::<Vec<_>>();
        let sync = with_retry(&self.options.retry, "replace_df_edges", || {
            self.store.replace_df_edges(&owners, &edges)
        })?;

        Ok(DfReport {
            entities_seen: groups.len(),
            edges_emitted: edges.len(),
            edges_inserted: sync.inserted,
            edges_removed: sync.removed,
        })
    }
}

/// Groups correlated events per entity, in entity id order.
pub fn group_by_entity(snapshot: &GraphSnapshot) -> Vec<EntityEvents<'_>> {
    let mut groups: BTreeMap<&str, EntityEvents<'_>> = BTreeMap::new();
    for edge in &snapshot.corr_edges {
        let (Some(entity), Some(event)) = (
            snapshot.entities.get(&edge.entity_id),
            snapshot.events.get(&edge.event_id),
        ) else {
            continue;
        };
        groups
            .entry(entity.id.as_str())
            .or_insert_with(|| EntityEvents {
                entity,
                events: Vec::new(),
            })
            .events
            .push(event);
    }
    groups.into_values().collect()
}

/// Orders `events` by `(timestamp, seq)` and links consecutive pairs.
pub fn trace_edges(entity: &Entity, events: &[&Event]) -> Vec<DfEdge> {
    let mut ordered = events.to_vec();
    ordered.sort_by_key(|event| event.order_key());
    ordered.dedup_by(|a, b| a.id == b.id);

    ordered
        .windows(2)
        .map(|pair| DfEdge {
            source_event_id: pair[0].id.clone(),
            target_event_id: pair[1].id.clone(),
            entity_id: entity.id.clone(),
            entity_type: entity.entity_type.clone(),
        })
        .collect()
}
