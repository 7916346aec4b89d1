//! Bounded worker pool shared by all parallel sequences of a pipeline.

use digi_core::{Error, Result};

/// Thin wrapper over a rayon thread pool.
///
/// Only parallel sequences dispatch onto the pool; sequential execution never
/// touches it.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl WorkerPool {
    /// Creates a pool with `threads` workers (0 = available parallelism).
    ///
    /// # Errors
    /// Returns a configuration error if the pool cannot be built.
    pub fn new(threads: usize) -> Result<Self> {
        let threads = if threads == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            threads
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("digi-worker-{index}"))
            .build()
            .map_err(|err| Error::config(format!("cannot build worker pool: {err}")))?;
        log::debug!("worker pool ready with {threads} threads");
        Ok(Self { pool, threads })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs `op` inside a rayon scope on this pool; returns after every task
    /// spawned in the scope has completed.
    pub fn scope<'scope, OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce(&rayon::Scope<'scope>) -> R + Send,
        R: Send,
    {
        self.pool.scope(op)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_pool_size() {
        let pool = WorkerPool::new(3).unwrap();
        assert_eq!(pool.threads(), 3);
        assert!(WorkerPool::new(0).unwrap().threads() >= 1);
    }

    #[test]
    fn test_scope_joins_all_tasks() {
        let pool = WorkerPool::new(2).unwrap();
        let counter = AtomicUsize::new(0);
        pool.scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        });
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }
}
