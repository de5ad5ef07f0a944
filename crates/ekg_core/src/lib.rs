//! Event knowledge graph construction.
//! Builds typed event/entity graphs from multi-entity event logs, derives
//! per-entity directly-follows edges and prunes the redundant ones.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod pool;
pub mod repo;
pub mod retry;
pub mod service;

pub use config::{ConfigError, EkgConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::graph::{
    CorrEdge, DerivedEdge, DfEdge, DfEdgeKey, Entity, EntityId, Event, EventId, GraphSummary,
    RelEdge,
};
pub use model::prune::{BoundaryPolicy, PruneRun, PruneRunId, PruneRunStatus};
pub use model::record::{
    DerivationRecord, EventRecord, LogBatch, ObjectRecord, RecordKind, RelationRecord,
    ValidationError,
};
pub use pool::WorkerPool;
pub use repo::graph_repo::{
    DfEdgeFilter, DfEdgeSync, GraphStore, SqliteGraphStore, StoreError, StoreResult,
};
pub use retry::RetryPolicy;
pub use service::derivation::{CyclicDerivationError, DerivationGraph};
pub use service::df_service::{DfConstructor, DfError, DfOptions, DfReport};
pub use service::integrity::ReferenceError;
pub use service::materialize_service::{MaterializeOptions, MaterializeReport, Materializer};
pub use service::pipeline::{EkgPipeline, PipelineError, PipelineReport, PipelineStage};
pub use service::prune_service::{PruneError, PruneOptions, PruneReport, RedundancyPruner};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
