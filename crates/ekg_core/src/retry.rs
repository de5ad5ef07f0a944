//! Retry with exponential backoff for transient store failures.
//!
//! # Invariants
//! - Only `StoreError::Unavailable` is retried; every other error returns
//!   on the first attempt.
//! - Wrapped operations must be idempotent or a single transaction, so a
//!   retry can never apply a write twice.

use crate::repo::graph_repo::{StoreError, StoreResult};
use log::warn;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 20,
            max_backoff_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before retry number `retry` (1-based), doubling each time.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Runs `op`, retrying transient store failures according to `policy`.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: impl FnMut() -> StoreResult<T>,
) -> StoreResult<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "event=store_retry module=retry status=retry operation={operation} attempt={attempt} delay_ms={} error={}",
                    delay.as_millis(),
                    err
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(give_up(operation, attempt, err)),
        }
    }
}

fn give_up(operation: &'static str, attempt: u32, err: StoreError) -> StoreError {
    if err.is_transient() {
        warn!(
            "event=store_retry module=retry status=error operation={operation} attempts={attempt} error={err}"
        );
    }
    err
}

#[cfg(test)]
mod tests {
    use super::{with_retry, RetryPolicy};
    use crate::repo::graph_repo::StoreError;
    use std::cell::Cell;
    use std::time::Duration;

    fn busy() -> StoreError {
        StoreError::from(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
        assert_eq!(policy.backoff(4), Duration::from_millis(50));
        assert_eq!(policy.backoff(80), Duration::from_millis(50));
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let calls = Cell::new(0);
        let result = with_retry(&fast_policy(4), "test_op", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(busy())
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(3), "test_op", || {
            calls.set(calls.get() + 1);
            Err(busy())
        });
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(5), "test_op", || {
            calls.set(calls.get() + 1);
            Err(StoreError::InvalidData("bad row".to_string()))
        });
        assert!(matches!(result, Err(StoreError::InvalidData(_))));
        assert_eq!(calls.get(), 1);
    }
}
