//! Fixed-capacity worker pool with bounded burst scaling (§4.5).
//!
//! Two pools exist in the running daemon: one for request apply/tear work,
//! one for timers (oversized by 2 to reserve slots for the pulse monitor and
//! the expired-handle garbage collector). Both are instances of this type.

use log::{trace, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

impl std::fmt::Display for QueueFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker pool queue is full")
    }
}

impl std::error::Error for QueueFull {}

pub struct WorkerPool {
    name: String,
    pool: threadpool::ThreadPool,
    queued: Arc<AtomicUsize>,
    desired: usize,
    max: usize,
    max_queue: usize,
}

impl WorkerPool {
    #[must_use]
    pub fn new(name: impl Into<String>, desired: usize, max: usize, max_queue: usize) -> Self {
        let name = name.into();
        let pool = threadpool::Builder::new()
            .num_threads(desired)
            .thread_name(name.clone())
            .build();
        Self {
            name,
            pool,
            queued: Arc::new(AtomicUsize::new(0)),
            desired,
            max: max.max(desired),
            max_queue,
        }
    }

    /// A timer pool sized `desired + 2` / `max + 2` to reserve slots for the
    /// pulse monitor and the expired-handle garbage collector (§4.5).
    #[must_use]
    pub fn new_timer_pool(name: impl Into<String>, desired: usize, max: usize, max_queue: usize) -> Self {
        Self::new(name, desired + 2, max + 2, max_queue)
    }

    /// Submits `job`. Returns `QueueFull` (never panics, never blocks) once
    /// the backlog hits `max_queue`; the caller maps this to `Overloaded`.
    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) -> Result<(), QueueFull> {
        let backlog = self.queued.fetch_add(1, Ordering::AcqRel) + 1;
        if backlog > self.max_queue {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            warn!("worker pool '{}' queue full at {backlog}, dropping task", self.name);
            return Err(QueueFull);
        }

        self.maybe_scale(backlog);

        let queued = self.queued.clone();
        self.pool.execute(move || {
            job();
            queued.fetch_sub(1, Ordering::AcqRel);
        });
        Ok(())
    }

    /// Burst scaling: grow toward `max` threads while the backlog exceeds
    /// `desired` in-flight tasks, shrink back to `desired` once drained.
    fn maybe_scale(&self, backlog: usize) {
        let current = self.pool.max_count();
        if backlog > self.desired && current < self.max {
            trace!("worker pool '{}' bursting to {} threads", self.name, self.max);
            self.pool.set_num_threads(self.max);
        } else if backlog <= self.desired && current > self.desired {
            trace!("worker pool '{}' settling back to {} threads", self.name, self.desired);
            self.pool.set_num_threads(self.desired);
        }
    }

    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Blocks until all submitted work has completed. Test-only: production
    /// code never waits on the pool it feeds.
    #[cfg(test)]
    pub fn join(&self) {
        self.pool.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as Counter;
    use std::time::Duration;

    #[test]
    fn runs_submitted_jobs() {
        let pool = WorkerPool::new("test", 2, 4, 16);
        let counter = Arc::new(Counter::new(0));
        for _ in 0..8 {
            let c = counter.clone();
            pool.enqueue(move || {
                c.fetch_add(1, Ordering::AcqRel);
            })
            .unwrap();
        }
        pool.join();
        assert_eq!(counter.load(Ordering::Acquire), 8);
    }

    #[test]
    fn overflow_returns_queue_full() {
        let pool = WorkerPool::new("test-overflow", 1, 1, 1);
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        pool.enqueue(move || {
            let _ = rx.recv_timeout(Duration::from_millis(200));
        })
        .unwrap();
        // the queue only has room for the one in-flight job above.
        assert_eq!(pool.enqueue(|| {}), Err(QueueFull));
        drop(tx);
    }
}
