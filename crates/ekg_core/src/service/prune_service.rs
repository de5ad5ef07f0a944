//! Redundant directly-follows edge pruning.
//!
//! # Responsibility
//! - Drop DF edges of a derived entity when the same causal step is already
//!   recorded by the entity it is derived from.
//! - Keep a derived entity's trace connected according to a configurable
//!   boundary policy.
//!
//! # Phases
//! 1. Initialize: every DF edge is informative.
//! 2. Downgrade: for a base edge `n: e1 -> e2` and every `rn` with
//!    `rn -DERIVED-> n` correlated to `e1` and `e2`, the edge `rn: e1 -> e2`
//!    becomes non-informative.
//! 3. Restore: a downgraded edge between an informative predecessor and an
//!    informative successor owned by the "same entity" (see
//!    [`BoundaryPolicy`]) becomes informative again.
//! 4. Commit: persisted flags drive one atomic delete of non-informative
//!    edges; all flags are cleared.
//!
//! # Invariants
//! - Each phase reads the complete result of the previous one; phases never
//!   observe partial updates.
//! - Phases 1-3 only touch in-memory values. Nothing is written before the
//!   flag checkpoint and nothing is deleted before commit.
//! - A cyclic DERIVED graph or a dangling edge fails the run before any
//!   write.

use crate::model::graph::DfEdge;
use crate::model::prune::{BoundaryPolicy, PruneRun, PruneRunId};
use crate::pool::WorkerPool;
use crate::repo::graph_repo::{GraphStore, StoreError};
use crate::retry::{with_retry, RetryPolicy};
use crate::service::derivation::{CyclicDerivationError, DerivationGraph};
use crate::service::integrity::{GraphSnapshot, ReferenceError};
use log::{error, info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default)]
pub struct PruneOptions {
    pub policy: BoundaryPolicy,
    /// Abort before commit once exceeded. `None` disables the check.
    pub timeout: Option<Duration>,
    pub pool: WorkerPool,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrunePhase {
    Initialize,
    Downgrade,
    Restore,
    Checkpoint,
    Commit,
}

impl PrunePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Downgrade => "downgrade",
            Self::Restore => "restore",
            Self::Checkpoint => "checkpoint",
            Self::Commit => "commit",
        }
    }
}

#[derive(Debug)]
pub enum PruneError {
    CyclicDerivation(CyclicDerivationError),
    Reference(ReferenceError),
    /// Deadline passed after `phase` finished; nothing was deleted.
    Timeout {
        phase: PrunePhase,
        elapsed: Duration,
    },
    Store(StoreError),
}

impl Display for PruneError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CyclicDerivation(err) => write!(f, "{err}"),
            Self::Reference(err) => write!(f, "{err}"),
            Self::Timeout { phase, elapsed } => write!(
                f,
                "prune timed out after phase `{}` ({} ms elapsed)",
                phase.as_str(),
                elapsed.as_millis()
            ),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PruneError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CyclicDerivation(err) => Some(err),
            Self::Reference(err) => Some(err),
            Self::Timeout { .. } => None,
            Self::Store(err) => Some(err),
        }
    }
}

impl From<CyclicDerivationError> for PruneError {
    fn from(value: CyclicDerivationError) -> Self {
        Self::CyclicDerivation(value)
    }
}

impl From<ReferenceError> for PruneError {
    fn from(value: ReferenceError) -> Self {
        Self::Reference(value)
    }
}

impl From<StoreError> for PruneError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub run_id: PruneRunId,
    pub policy: BoundaryPolicy,
    pub edges_considered: u64,
    pub downgraded: u64,
    pub restored: u64,
    pub deleted: u64,
}

/// DF edge plus its informative flag, alive for one prune run only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlaggedEdge {
    pub edge: DfEdge,
    pub informative: bool,
}

/// Outcome of phases 1-3, before anything is written.
#[derive(Debug, Clone, Default)]
pub struct PrunePlan {
    pub edges: Vec<FlaggedEdge>,
    pub downgraded: usize,
    pub restored: usize,
}

impl PrunePlan {
    /// Edges that phase 4 will delete.
    pub fn redundant(&self) -> impl Iterator<Item = &DfEdge> {
        self.edges
            .iter()
            .filter(|flagged| !flagged.informative)
            .map(|flagged| &flagged.edge)
    }
}

pub struct RedundancyPruner<S: GraphStore> {
    store: S,
    options: PruneOptions,
}

impl<S: GraphStore> RedundancyPruner<S> {
    pub fn new(store: S, options: PruneOptions) -> Self {
        Self { store, options }
    }

    /// Runs all four phases over the stored DF edge set.
    ///
    /// # Errors
    /// - `CyclicDerivation` / `Reference` before any write.
    /// - `Timeout` at a phase barrier; if flags were already persisted the
    ///   run stays pending and [`Self::resume_pending`] can finish it.
    /// - `Store` when a write fails after retries; the affected transaction
    ///   is rolled back as a whole.
    pub fn prune(&self) -> Result<PruneReport, PruneError> {
        let deadline = Deadline::start(self.options.timeout);
        info!(
            "event=prune module=prune status=start policy={}",
            self.options.policy.as_str()
        );

        match self.prune_inner(&deadline) {
            Ok(report) => {
                info!(
                    "event=prune module=prune status=ok run_id={} duration_ms={} considered={} downgraded={} restored={} deleted={}",
                    report.run_id,
                    deadline.elapsed().as_millis(),
                    report.edges_considered,
                    report.downgraded,
                    report.restored,
                    report.deleted
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    "event=prune module=prune status=error duration_ms={} error={}",
                    deadline.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Commits a run left pending by an interrupted or timed-out prune.
    /// Returns `None` when no run is pending.
    pub fn resume_pending(&self) -> Result<Option<PruneReport>, PruneError> {
        let Some(run) = self.store.pending_prune_run()? else {
            return Ok(None);
        };
        info!(
            "event=prune_resume module=prune status=start run_id={}",
            run.run_id
        );
        let deleted = self.commit(run.run_id)?;
        Ok(Some(PruneReport {
            run_id: run.run_id,
            policy: run.policy,
            edges_considered: run.edges_considered,
            downgraded: run.downgraded,
            restored: run.restored,
            deleted,
        }))
    }

    fn prune_inner(&self, deadline: &Deadline) -> Result<PruneReport, PruneError> {
        let snapshot = GraphSnapshot::load(&self.store)?;
        snapshot.verify_references()?;
        let derivation = DerivationGraph::checked(&snapshot.derived_edges)?;

        let plan = plan_prune(
            &snapshot,
            &derivation,
            self.options.policy,
            self.options.pool,
            deadline,
        )?;

        let run = PruneRun::flagged(
            self.options.policy,
            plan.edges.len() as u64,
            plan.downgraded as u64,
            plan.restored as u64,
        );
        let flags = plan
            .edges
            .iter()
            .map(|flagged| (flagged.edge.key(), flagged.informative))
            .collect::<Vec<_>>();
        with_retry(&self.options.retry, "tag_df_edges", || {
            self.store.tag_df_edges(&run, &flags)
        })?;
        info!(
            "event=prune_checkpoint module=prune status=ok run_id={} flagged={}",
            run.run_id,
            flags.len()
        );
        deadline.check(PrunePhase::Checkpoint)?;

        let expected = plan.redundant().count() as u64;
        let deleted = self.commit(run.run_id)?;
        if let Some(line) = commit_mismatch_line(run.run_id, expected, deleted) {
            warn!("{line}");
        }

        Ok(PruneReport {
            run_id: run.run_id,
            policy: run.policy,
            edges_considered: run.edges_considered,
            downgraded: run.downgraded,
            restored: run.restored,
            deleted,
        })
    }

    fn commit(&self, run_id: PruneRunId) -> Result<u64, PruneError> {
        let deleted = with_retry(&self.options.retry, "commit_prune_run", || {
            self.store.commit_prune_run(run_id)
        })?;
        Ok(deleted as u64)
    }
}

/// Log line for a commit that deleted a different number of edges than the
/// plan marked redundant; `None` when the counts agree.
fn commit_mismatch_line(run_id: PruneRunId, expected: u64, deleted: u64) -> Option<String> {
    (deleted != expected).then(|| {
        format!(
            "event=prune_commit_mismatch module=prune status=error run_id={run_id} expected_deleted={expected} deleted={deleted}"
        )
    })
}

/// Computes phases 1-3 over `snapshot` without touching the store.
///
/// `derivation` must be acyclic; see [`DerivationGraph::checked`].
pub fn plan_prune(
    snapshot: &GraphSnapshot,
    derivation: &DerivationGraph,
    policy: BoundaryPolicy,
    pool: WorkerPool,
    deadline: &Deadline,
) -> Result<PrunePlan, PruneError> {
    let mut edges = snapshot
        .df_edges
        .iter()
        .cloned()
        .map(|edge| FlaggedEdge {
            edge,
            informative: true,
        })
        .collect::<Vec<_>>();
    deadline.check(PrunePhase::Initialize)?;

    let downgrade = find_redundant(&edges, snapshot, derivation, pool);
    for &index in &downgrade {
        edges[index].informative = false;
    }
    let downgraded = downgrade.len();
    deadline.check(PrunePhase::Downgrade)?;

    let restore = find_boundaries(&edges, policy);
    for &index in &restore {
        edges[index].informative = true;
    }
    let restored = restore.len();
    deadline.check(PrunePhase::Restore)?;

    Ok(PrunePlan {
        edges,
        downgraded,
        restored,
    })
}

/// Phase 2. Returns sorted, distinct indices of derived edges whose step is
/// already witnessed by a base edge. Reads phase-1 state only, so each base
/// edge is evaluated independently on the pool.
fn find_redundant(
    edges: &[FlaggedEdge],
    snapshot: &GraphSnapshot,
    derivation: &DerivationGraph,
    pool: WorkerPool,
) -> Vec<usize> {
    let by_key: HashMap<(&str, &str, &str), usize> = edges
        .iter()
        .enumerate()
        .map(|(index, flagged)| {
            let edge = &flagged.edge;
            (
                (
                    edge.source_event_id.as_str(),
                    edge.target_event_id.as_str(),
                    edge.entity_id.as_str(),
                ),
                index,
            )
        })
        .collect();
    let correlated: HashSet<(&str, &str)> = snapshot
        .corr_edges
        .iter()
        .map(|corr| (corr.event_id.as_str(), corr.entity_id.as_str()))
        .collect();

    let mut redundant = pool
        .map(edges, |base| {
            let base = &base.edge;
            derivation
                .derived_views_of(&base.entity_id)
                .filter(|view| {
                    correlated.contains(&(base.source_event_id.as_str(), view.as_str()))
                        && correlated.contains(&(base.target_event_id.as_str(), view.as_str()))
                })
                .filter_map(|view| {
                    by_key
                        .get(&(
                            base.source_event_id.as_str(),
                            base.target_event_id.as_str(),
                            view.as_str(),
                        ))
                        .copied()
                })
                .collect::<Vec<_>>()
        })
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
    redundant.sort_unstable();
    redundant.dedup();
    redundant
}

/// Phase 3. Returns indices of downgraded edges that sit between an
/// informative predecessor and an informative successor of the same owner.
/// Evaluated against the phase-2 flags as a whole, so one restoration never
/// enables another within the same run.
fn find_boundaries(edges: &[FlaggedEdge], policy: BoundaryPolicy) -> Vec<usize> {
    if policy == BoundaryPolicy::Disabled {
        return Vec::new();
    }

    let mut incoming: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut outgoing: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, flagged) in edges.iter().enumerate() {
        incoming
            .entry(flagged.edge.target_event_id.as_str())
            .or_default()
            .push(index);
        outgoing
            .entry(flagged.edge.source_event_id.as_str())
            .or_default()
            .push(index);
    }

    let has_informative_neighbour = |neighbours: Option<&Vec<usize>>, edge: &DfEdge| {
        neighbours.into_iter().flatten().any(|&index| {
            edges[index].informative && same_owner(policy, &edges[index].edge, edge)
        })
    };

    edges
        .iter()
        .enumerate()
        .filter(|(_, flagged)| !flagged.informative)
        .filter(|(_, flagged)| {
            let edge = &flagged.edge;
            has_informative_neighbour(incoming.get(edge.source_event_id.as_str()), edge)
                && has_informative_neighbour(outgoing.get(edge.target_event_id.as_str()), edge)
        })
        .map(|(index, _)| index)
        .collect()
}

fn same_owner(policy: BoundaryPolicy, a: &DfEdge, b: &DfEdge) -> bool {
    match policy {
        BoundaryPolicy::ByEntityId => a.entity_id == b.entity_id,
        BoundaryPolicy::ByEntityType => a.entity_type == b.entity_type,
        BoundaryPolicy::Disabled => false,
    }
}

/// Coarse wall-clock budget checked at phase barriers.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started_at: Instant,
    timeout: Option<Duration>,
}

impl Deadline {
    pub fn start(timeout: Option<Duration>) -> Self {
        Self {
            started_at: Instant::now(),
            timeout,
        }
    }

    pub fn unbounded() -> Self {
        Self::start(None)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Fails with `Timeout` if the budget is spent once `phase` finished.
    pub fn check(&self, phase: PrunePhase) -> Result<(), PruneError> {
        let Some(timeout) = self.timeout else {
            return Ok(());
        };
        let elapsed = self.elapsed();
        if elapsed >= timeout {
            warn!(
                "event=prune_timeout module=prune status=error phase={} elapsed_ms={} timeout_ms={}",
                phase.as_str(),
                elapsed.as_millis(),
                timeout.as_millis()
            );
            return Err(PruneError::Timeout { phase, elapsed });
        }
        Ok(())
    }
}
