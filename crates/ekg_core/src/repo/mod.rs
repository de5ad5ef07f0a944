//! Repository layer: the graph store adapter.
//!
//! # Responsibility
//! - Define the primitive read/write contract the EKG services depend on.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Writes are idempotent upserts keyed by natural identifiers.
//! - Repository APIs return semantic errors (`PruneRunNotPending`,
//!   `Unavailable`) in addition to DB transport errors.

pub mod graph_repo;
