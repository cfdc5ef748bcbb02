//! Pool execution counters and derived statistics snapshots

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Live execution counters shared between the workers of one pool
///
/// Only the worker that finishes a task touches the completion counters, so
/// `completed_tasks` is monotonically non-decreasing. A task that fails or
/// panics still counts as completed and still records its duration.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    /// Tasks accepted by submit/submit_batch
    pub submitted: AtomicU64,
    /// Workers currently inside a task body
    pub active: AtomicUsize,
    /// Tasks finished (successfully or not)
    pub completed: AtomicU64,
    /// Tasks obtained via steal rather than the worker's own pop
    pub stolen: AtomicU64,
    /// Cumulative wall-clock execution time, microseconds
    pub total_task_time_us: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record one finished task
    pub(crate) fn record_completion(&self, elapsed: Duration, stolen: bool) {
        self.total_task_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        if stolen {
            self.stolen.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Build a derived snapshot; never blocks a worker
    pub(crate) fn snapshot(
        &self,
        total_workers: usize,
        pending_tasks: usize,
        started: Instant,
    ) -> PoolStats {
        let completed = self.completed.load(Ordering::Acquire);
        let total_us = self.total_task_time_us.load(Ordering::Acquire);
        let elapsed = started.elapsed().as_secs_f64();

        let tasks_per_second = if elapsed > 0.0 {
            completed as f64 / elapsed
        } else {
            0.0
        };
        let avg_task_time = if completed > 0 {
            Duration::from_micros(total_us / completed)
        } else {
            Duration::ZERO
        };

        PoolStats {
            total_workers,
            active_workers: self.active.load(Ordering::Acquire),
            pending_tasks,
            completed_tasks: completed,
            stolen_tasks: self.stolen.load(Ordering::Acquire),
            tasks_per_second,
            avg_task_time,
        }
    }
}

/// Point-in-time view of a pool's execution counters
///
/// Derived from the live counters on every call; there is no separately
/// maintained state that could drift. `stolen_tasks` is always 0 for pools
/// without per-worker buffers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    /// Number of worker threads
    pub total_workers: usize,
    /// Workers currently executing a task
    pub active_workers: usize,
    /// Tasks waiting in buffers and overflow
    pub pending_tasks: usize,
    /// Tasks finished since pool creation (including failures)
    pub completed_tasks: u64,
    /// Tasks that changed workers through stealing
    pub stolen_tasks: u64,
    /// Completed tasks divided by seconds since pool creation
    pub tasks_per_second: f64,
    /// Mean wall-clock execution time per finished task
    pub avg_task_time: Duration,
}
