//! Redundancy-pruning run metadata.
//!
//! # Invariants
//! - At most one run is `Flagged` at a time; starting a new run aborts the
//!   previous pending one.
//! - A `Committed` run has no informative flags left on any DF edge.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PruneRunId = Uuid;

/// Matching rule for boundary restoration (phase 3).
///
/// A downgraded edge `r` is restored when it sits between an informative
/// predecessor and an informative successor that both "belong to the same
/// entity" as `r`. The policy decides what "same entity" means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Neighbours must be owned by exactly the same entity id.
    #[default]
    ByEntityId,
    /// Neighbours must be owned by entities of the same entity type.
    ByEntityType,
    /// Never restore; downgraded edges are always deleted.
    Disabled,
}

impl BoundaryPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ByEntityId => "by_entity_id",
            Self::ByEntityType => "by_entity_type",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "by_entity_id" => Some(Self::ByEntityId),
            "by_entity_type" => Some(Self::ByEntityType),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneRunStatus {
    /// Flags persisted, deletions not yet committed.
    Flagged,
    Committed,
    /// Superseded by a later run before committing.
    Aborted,
}

impl PruneRunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flagged => "flagged",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "flagged" => Some(Self::Flagged),
            "committed" => Some(Self::Committed),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }
}

/// Persisted record of one pruning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneRun {
    pub run_id: PruneRunId,
    pub policy: BoundaryPolicy,
    pub status: PruneRunStatus,
    pub edges_considered: u64,
    pub downgraded: u64,
    pub restored: u64,
    /// Set once the run is committed.
    pub deleted: Option<u64>,
}

impl PruneRun {
    pub fn flagged(
        policy: BoundaryPolicy,
        edges_considered: u64,
        downgraded: u64,
        restored: u64,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            policy,
            status: PruneRunStatus::Flagged,
            edges_considered,
            downgraded,
            restored,
            deleted: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BoundaryPolicy, PruneRunStatus};

    #[test]
    fn policy_names_roundtrip_and_default_is_by_entity_id() {
        for policy in [
            BoundaryPolicy::ByEntityId,
            BoundaryPolicy::ByEntityType,
            BoundaryPolicy::Disabled,
        ] {
            assert_eq!(BoundaryPolicy::parse(policy.as_str()), Some(policy));
        }
        assert_eq!(BoundaryPolicy::default(), BoundaryPolicy::ByEntityId);
        assert_eq!(BoundaryPolicy::parse("by_id"), None);
    }

    #[test]
    fn status_parse_rejects_unknown_values() {
        assert_eq!(PruneRunStatus::parse("flagged"), Some(PruneRunStatus::Flagged));
        assert_eq!(PruneRunStatus::parse("done"), None);
    }
}
