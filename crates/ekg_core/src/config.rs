//! Runtime configuration for one EKG build.
//!
//! # Invariants
//! - Every field has a default, so a partial (or empty) JSON object is a
//!   valid configuration.
//! - Services never read configuration directly; they receive the option
//!   structs derived here.

use crate::model::prune::BoundaryPolicy;
use crate::pool::{available_parallelism, WorkerPool};
use crate::retry::RetryPolicy;
use crate::service::df_service::DfOptions;
use crate::service::materialize_service::MaterializeOptions;
use crate::service::prune_service::PruneOptions;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EkgConfig {
    /// Upper bound on worker threads used by every stage.
    pub parallelism: usize,
    pub boundary_policy: BoundaryPolicy,
    /// Prune deadline in milliseconds; absent means unbounded.
    pub prune_timeout_ms: Option<u64>,
    pub retry: RetryPolicy,
    pub log_level: String,
}

impl Default for EkgConfig {
    fn default() -> Self {
        Self {
            parallelism: available_parallelism(),
            boundary_policy: BoundaryPolicy::default(),
            prune_timeout_ms: None,
            retry: RetryPolicy::default(),
            log_level: crate::logging::default_log_level().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroParallelism,
    ZeroRetryAttempts,
    InvalidBackoff {
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroParallelism => write!(f, "parallelism must be at least 1"),
            Self::ZeroRetryAttempts => write!(f, "retry.max_attempts must be at least 1"),
            Self::InvalidBackoff {
                initial_backoff_ms,
                max_backoff_ms,
            } => write!(
                f,
                "retry.initial_backoff_ms ({initial_backoff_ms}) exceeds retry.max_backoff_ms ({max_backoff_ms})"
            ),
        }
    }
}

impl Error for ConfigError {}

impl EkgConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism == 0 {
            return Err(ConfigError::ZeroParallelism);
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts);
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff {
                initial_backoff_ms: self.retry.initial_backoff_ms,
                max_backoff_ms: self.retry.max_backoff_ms,
            });
        }
        Ok(())
    }

    pub fn pool(&self) -> WorkerPool {
        WorkerPool::new(self.parallelism)
    }

    pub fn materialize_options(&self) -> MaterializeOptions {
        MaterializeOptions {
            pool: self.pool(),
            retry: self.retry,
        }
    }

    pub fn df_options(&self) -> DfOptions {
        DfOptions {
            pool: self.pool(),
            retry: self.retry,
        }
    }

    pub fn prune_options(&self) -> PruneOptions {
        PruneOptions {
            policy: self.boundary_policy,
            timeout: self.prune_timeout_ms.map(Duration::from_millis),
            pool: self.pool(),
            retry: self.retry,
        }
    }
}
