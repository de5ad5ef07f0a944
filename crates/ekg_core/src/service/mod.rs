//! EKG construction services.
//!
//! # Responsibility
//! - Turn log records into a graph and refine it, one service per stage.
//! - Keep CLI layers decoupled from storage details.

pub mod derivation;
pub mod df_service;
pub mod integrity;
pub mod materialize_service;
pub mod pipeline;
pub mod prune_service;
