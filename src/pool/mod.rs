//! Worker pool variants and their shared vocabulary
//!
//! Two pool families share one submission contract: [`WorkStealingPool`]
//! (per-worker buffers, randomized theft, overflow queue) for high-frequency
//! submission, and [`SharedQueuePool`] (one FIFO, configurable idle wait)
//! for workloads below the throughput where stealing pays for itself.
//! The [`WorkerPool`] trait is the seam the scheduler and the reporting
//! decorator are generic over.

pub mod buffer;
pub mod config;
pub mod shared;
pub mod stats;
pub mod stealing;

pub use buffer::TaskDeque;
pub use config::{PoolConfig, WaitStrategy};
pub use shared::SharedQueuePool;
pub use stats::PoolStats;
pub use stealing::WorkStealingPool;

use crate::core::task::{package, Task, TaskHandle};
use crate::core::Result;
use std::sync::Arc;

/// The submission contract every pool variant provides
///
/// The scheduler hands fired timer entries to any implementation of this
/// trait; tests substitute manual pools through the same seam.
pub trait WorkerPool: Send + Sync {
    /// Enqueue a type-erased task for execution by some worker
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::PoolStopped`](crate::PoolError::PoolStopped)
    /// once shutdown has begun; the task is never silently dropped.
    fn submit_task(&self, task: Task) -> Result<()>;

    /// Number of worker threads
    fn size(&self) -> usize;

    /// Tasks buffered but not yet started (best-effort)
    fn pending_tasks(&self) -> usize;

    /// Block the caller until no task is pending or executing
    fn wait_for_tasks(&self);

    /// Stop accepting work, wake all workers, and join them
    ///
    /// Idempotent. In-flight tasks finish; buffered tasks are discarded
    /// and their completion handles report the task as dropped.
    fn shutdown(&self);
}

/// Partitions `items` into roughly `workers * 4` chunks and runs `f` over
/// them on the pool, blocking until every chunk has resolved.
///
/// Chunking amortizes submission overhead versus one task per item. A chunk
/// whose `f` panics does not abort the remaining chunks; the first failure
/// is returned after all chunks have settled.
pub(crate) fn parallel_for_each_on<P, I, F>(pool: &P, items: I, f: F) -> Result<()>
where
    P: WorkerPool + ?Sized,
    I: IntoIterator,
    I::Item: Send + 'static,
    F: Fn(I::Item) + Send + Sync + 'static,
{
    let items: Vec<I::Item> = items.into_iter().collect();
    if items.is_empty() {
        return Ok(());
    }

    let workers = pool.size().max(1);
    let chunk_size = (items.len() / (workers * 4)).max(1);
    let f = Arc::new(f);

    let mut handles: Vec<TaskHandle<()>> = Vec::with_capacity(items.len() / chunk_size + 1);
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        let chunk: Vec<I::Item> = iter.by_ref().take(chunk_size).collect();
        let func = Arc::clone(&f);
        let (task, handle) = package(move || {
            for item in chunk {
                func(item);
            }
        });
        pool.submit_task(task)?;
        handles.push(handle);
    }

    let mut first_err = None;
    for handle in handles {
        if let Err(e) = handle.get() {
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
