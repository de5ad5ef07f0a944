//! End-to-end EKG build: materialize, construct DF, prune.
//!
//! # Invariants
//! - Stages run strictly in order; a failing stage stops the pipeline and
//!   later stages never observe its partial output.
//! - Every completed stage contributes one timing entry.

use crate::config::EkgConfig;
use crate::model::graph::GraphSummary;
use crate::model::record::LogBatch;
use crate::repo::graph_repo::{GraphStore, StoreError};
use crate::service::df_service::{DfConstructor, DfError, DfReport};
use crate::service::materialize_service::{MaterializeReport, Materializer};
use crate::service::prune_service::{PruneError, PruneReport, RedundancyPruner};
use log::info;
use serde::{Serialize, Serializer};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Materialize,
    Construct,
    Prune,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Materialize => "materialize",
            Self::Construct => "construct",
            Self::Prune => "prune",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageTiming {
    pub stage: PipelineStage,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub materialize: MaterializeReport,
    pub construct: DfReport,
    pub prune: PruneReport,
    pub timings: Vec<StageTiming>,
    pub summary: GraphSummary,
}

#[derive(Debug)]
pub enum PipelineError {
    Store(StoreError),
    Construct(DfError),
    Prune(PruneError),
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "materialize failed: {err}"),
            Self::Construct(err) => write!(f, "df construction failed: {err}"),
            Self::Prune(err) => write!(f, "prune failed: {err}"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Construct(err) => Some(err),
            Self::Prune(err) => Some(err),
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<DfError> for PipelineError {
    fn from(value: DfError) -> Self {
        Self::Construct(value)
    }
}

impl From<PruneError> for PipelineError {
    fn from(value: PruneError) -> Self {
        Self::Prune(value)
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

pub struct EkgPipeline<S: GraphStore + Clone> {
    store: S,
    config: EkgConfig,
}

impl<S: GraphStore + Clone> EkgPipeline<S> {
    pub fn new(store: S, config: EkgConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &EkgConfig {
        &self.config
    }

    /// Wipes the store, then builds the EKG for `batch` from scratch.
    pub fn rebuild(&self, batch: &LogBatch) -> PipelineResult<PipelineReport> {
        let previous = self.store.graph_summary()?;
        self.store.clear()?;
        info!(
            "event=store_clear module=pipeline status=ok events={} entities={} df_edges={}",
            previous.events, previous.entities, previous.df_edges
        );
        self.run(batch)
    }

    /// Builds the EKG for `batch` on top of whatever the store holds.
    /// Traces of already stored entities are relinked when new events fall
    /// between old ones.
    pub fn run(&self, batch: &LogBatch) -> PipelineResult<PipelineReport> {
        let mut timings = Vec::with_capacity(3);

        let materializer = Materializer::new(self.store.clone(), self.config.materialize_options());
        let materialize = timed(&mut timings, PipelineStage::Materialize, || {
            materializer.materialize(batch)
        })?;

        let constructor = DfConstructor::new(self.store.clone(), self.config.df_options());
        let construct = timed(&mut timings, PipelineStage::Construct, || {
            constructor.construct()
        })?;

        let pruner = RedundancyPruner::new(self.store.clone(), self.config.prune_options());
        let prune = timed(&mut timings, PipelineStage::Prune, || pruner.prune())?;

        let summary = self.store.graph_summary()?;
        info!(
            "event=pipeline module=pipeline status=ok events={} entities={} df_edges={}",
            summary.events, summary.entities, summary.df_edges
        );

        Ok(PipelineReport {
            materialize,
            construct,
            prune,
            timings,
            summary,
        })
    }
}

fn timed<T, E>(
    timings: &mut Vec<StageTiming>,
    stage: PipelineStage,
    run: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    let started_at = Instant::now();
    let output = run()?;
    let duration = started_at.elapsed();
    info!(
        "event=pipeline_stage module=pipeline status=ok stage={} duration_ms={}",
        stage.as_str(),
        duration.as_millis()
    );
    timings.push(StageTiming { stage, duration });
    Ok(output)
}

fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}
