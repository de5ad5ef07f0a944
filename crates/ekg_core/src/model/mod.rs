//! Event knowledge graph domain model.
//!
//! # Responsibility
//! - Define the node and edge value types the graph store persists.
//! - Define the strongly-typed log records consumed at ingestion.
//!
//! # Invariants
//! - Nodes and edges are identified by natural keys, never by storage ids.
//! - Only directly-follows edges are ever deleted.

pub mod graph;
pub mod prune;
pub mod record;
