//! Log-to-graph materialization.
//!
//! # Responsibility
//! - Turn a `LogBatch` into Event/Entity nodes and CORR/REL/DERIVED edges.
//! - Reject malformed records individually without aborting the batch.
//!
//! # Invariants
//! - Application order is entities, events (+CORR), REL, DERIVED, so every
//!   edge family sees the nodes it refers to.
//! - Re-materializing the same batch inserts nothing new.
//! - DERIVED edges that would close a cycle are rejected at load time.

use crate::model::graph::{CorrEdge, DerivedEdge, EntityId, RelEdge};
use crate::model::record::{LogBatch, RecordKind, ValidationError};
use crate::pool::WorkerPool;
use crate::repo::graph_repo::{GraphStore, StoreResult};
use crate::retry::{with_retry, RetryPolicy};
use crate::service::derivation::DerivationGraph;
use log::{error, info, warn};
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::fmt::Display;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Default)]
pub struct MaterializeOptions {
    pub pool: WorkerPool,
    pub retry: RetryPolicy,
}

/// A record skipped because it failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRecord {
    pub kind: RecordKind,
    /// Position of the record within its family in the batch.
    pub index: usize,
    #[serde(serialize_with = "serialize_display")]
    pub error: ValidationError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaterializeReport {
    pub entities_inserted: usize,
    pub events_inserted: usize,
    pub corr_inserted: usize,
    pub rel_inserted: usize,
    pub derived_inserted: usize,
    pub rejected: Vec<RejectedRecord>,
}

impl MaterializeReport {
    fn reject(&mut self, kind: RecordKind, index: usize, error: ValidationError) {
        warn!(
            "event=record_rejected module=materialize status=skip kind={} index={} error={}",
            kind.as_str(),
            index,
            error
        );
        self.rejected.push(RejectedRecord { kind, index, error });
    }
}

pub struct Materializer<S: GraphStore> {
    store: S,
    options: MaterializeOptions,
}

impl<S: GraphStore> Materializer<S> {
    pub fn new(store: S, options: MaterializeOptions) -> Self {
        Self { store, options }
    }

    /// Writes `batch` into the store.
    ///
    /// # Errors
    /// Only store failures abort; validation failures are collected in
    /// `MaterializeReport::rejected`.
    pub fn materialize(&self, batch: &LogBatch) -> StoreResult<MaterializeReport> {
        let started_at = Instant::now();
        info!(
            "event=materialize module=materialize status=start events={} objects={} relations={} derivations={}",
            batch.events.len(),
            batch.objects.len(),
            batch.relations.len(),
            batch.derivations.len()
        );

        match self.materialize_inner(batch) {
            Ok(report) => {
                info!(
                    "event=materialize module=materialize status=ok duration_ms={} entities={} events={} corr={} rel={} derived={} rejected={}",
                    started_at.elapsed().as_millis(),
                    report.entities_inserted,
                    report.events_inserted,
                    report.corr_inserted,
                    report.rel_inserted,
                    report.derived_inserted,
                    report.rejected.len()
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    "event=materialize module=materialize status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn materialize_inner(&self, batch: &LogBatch) -> StoreResult<MaterializeReport> {
        let mut report = MaterializeReport::default();
        let pool = self.options.pool;
        let retry = &self.options.retry;

        let mut entities = Vec::new();
        for (index, result) in pool
            .map(&batch.objects, |record| record.validate())
            .into_iter()
            .enumerate()
        {
            match result {
                Ok(entity) => entities.push(entity),
                Err(err) => report.reject(RecordKind::Object, index, err),
            }
        }
        report.entities_inserted =
            with_retry(retry, "upsert_entities", || self.store.upsert_entities(&entities))?;

        let known: HashSet<EntityId> = self
            .store
            .list_entities()?
            .into_iter()
            .map(|entity| entity.id)
            .collect();

        let mut drafts = Vec::new();
        let mut correlations = Vec::new();
        for (index, result) in pool
            .map(&batch.events, |record| record.validate())
            .into_iter()
            .enumerate()
        {
            let (draft, correlated) = match result {
                Ok(validated) => validated,
                Err(err) => {
                    report.reject(RecordKind::Event, index, err);
                    continue;
                }
            };
            for entity_id in correlated {
                if known.contains(&entity_id) {
                    correlations.push(CorrEdge {
                        event_id: draft.id.clone(),
                        entity_id,
                    });
                } else {
                    report.reject(
                        RecordKind::Event,
                        index,
                        ValidationError::UnknownEntity {
                            record: RecordKind::Event,
                            entity_id,
                        },
                    );
                }
            }
            drafts.push(draft);
        }
        report.events_inserted =
            with_retry(retry, "append_events", || self.store.append_events(&drafts))?;
        report.corr_inserted = with_retry(retry, "upsert_corr_edges", || {
            self.store.upsert_corr_edges(&correlations)
        })?;

        let mut relations: Vec<RelEdge> = Vec::new();
        for (index, record) in batch.relations.iter().enumerate() {
            let accepted = record.validate().and_then(|edge| {
                require_known(&known, RecordKind::Relation, edge, |edge| {
                    [&edge.source_id, &edge.target_id]
                })
            });
            match accepted {
                Ok(edge) => relations.push(edge),
                Err(err) => report.reject(RecordKind::Relation, index, err),
            }
        }
        report.rel_inserted = with_retry(retry, "upsert_rel_edges", || {
            self.store.upsert_rel_edges(&relations)
        })?;

        let mut derivation = DerivationGraph::from_edges(&self.store.list_derived_edges()?);
        let mut derivations: Vec<DerivedEdge> = Vec::new();
        for (index, record) in batch.derivations.iter().enumerate() {
            let accepted = record
                .validate()
                .and_then(|edge| {
                    require_known(&known, RecordKind::Derivation, edge, |edge| {
                        [&edge.derived_id, &edge.base_id]
                    })
                })
                .and_then(|edge| {
                    if derivation.would_create_cycle(&edge) {
                        Err(ValidationError::CyclicDerivation {
                            derived: edge.derived_id,
                            base: edge.base_id,
                        })
                    } else {
                        Ok(edge)
                    }
                });
            match accepted {
                Ok(edge) => {
                    derivation.insert(&edge);
                    derivations.push(edge);
                }
                Err(err) => report.reject(RecordKind::Derivation, index, err),
            }
        }
        report.derived_inserted = with_retry(retry, "upsert_derived_edges", || {
            self.store.upsert_derived_edges(&derivations)
        })?;

        Ok(report)
    }
}

fn require_known<T>(
    known: &HashSet<EntityId>,
    record: RecordKind,
    edge: T,
    endpoints: impl Fn(&T) -> [&EntityId; 2],
) -> Result<T, ValidationError> {
    if let Some(missing) = endpoints(&edge).into_iter().find(|id| !known.contains(*id)) {
        return Err(ValidationError::UnknownEntity {
            record,
            entity_id: missing.clone(),
        });
    }
    Ok(edge)
}

fn serialize_display<T: Display, S: Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}
