//! Bounded worker pool for per-entity work.
//!
//! # Invariants
//! - At most `workers` threads run at once; threads are scoped to one call.
//! - Output order matches input order regardless of scheduling.
//! - Workers only compute; writes to the graph store happen on the caller's
//!   thread after the pool has drained.

use std::num::NonZeroUsize;
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// Creates a pool with `workers` threads; zero is clamped to one.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn from_available_parallelism() -> Self {
        Self::new(available_parallelism())
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Applies `f` to every item, splitting the slice into contiguous chunks
    /// across the pool. A panic in a worker is resumed on the caller.
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        if items.is_empty() {
            return Vec::new();
        }

        let workers = self.workers.min(items.len());
        if workers == 1 {
            return items.iter().map(&f).collect();
        }

        let chunk_size = items.len().div_ceil(workers);
        thread::scope(|scope| {
            let f = &f;
            let handles = items
                .chunks(chunk_size)
                .map(|chunk| scope.spawn(move || chunk.iter().map(f).collect::<Vec<R>>()))
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .flat_map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
                })
                .collect()
        })
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::from_available_parallelism()
    }
}

/// Number of worker threads the host supports, falling back to 4.
pub fn available_parallelism() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}
