//! Single-queue pool
//!
//! All workers drain one shared FIFO. Compared to the work-stealing pool
//! this trades peak submission throughput for less machinery; below the
//! rate where per-worker buffers and theft pay for themselves it is the
//! better baseline. [`WaitStrategy`] selects between the two operating
//! points: an event-driven unbounded wait, or a bounded timed wait that
//! re-polls on an interval.

use crate::core::task::{package, panic_message, Task, TaskHandle};
use crate::core::{PoolError, Result};
use crate::pool::config::{PoolConfig, WaitStrategy};
use crate::pool::stats::{PoolCounters, PoolStats};
use crate::pool::{parallel_for_each_on, WorkerPool};
use crossbeam_channel::{select, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

struct SharedInner {
    stop: AtomicBool,
    counters: PoolCounters,
    started: Instant,
    done_lock: Mutex<()>,
    done_cond: Condvar,
}

impl SharedInner {
    fn execute(&self, task: Task) {
        self.counters.active.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(task));
        let elapsed = start.elapsed();
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
        self.counters.record_completion(elapsed, false);

        if let Err(payload) = outcome {
            error!(
                "task panicked past its completion wrapper: {}",
                panic_message(payload.as_ref())
            );
        }

        // Pairs with the check in wait_for_tasks.
        drop(self.done_lock.lock());
        self.done_cond.notify_all();
    }

    fn worker_loop(
        &self,
        worker_id: usize,
        tasks: Receiver<Task>,
        shutdown: Receiver<()>,
        strategy: WaitStrategy,
    ) {
        debug!("worker {} started", worker_id);
        match strategy {
            WaitStrategy::Blocking => loop {
                // Checked before seeking work: queued tasks are abandoned
                // once shutdown begins, not drained.
                if self.stop.load(Ordering::Acquire) {
                    break;
                }
                select! {
                    recv(tasks) -> msg => match msg {
                        Ok(task) => self.execute(task),
                        Err(_) => break,
                    },
                    recv(shutdown) -> _ => break,
                }
            },
            WaitStrategy::Polling(interval) => loop {
                if self.stop.load(Ordering::Acquire) {
                    break;
                }
                match tasks.recv_timeout(interval) {
                    Ok(task) => self.execute(task),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            },
        }
        debug!("worker {} exiting", worker_id);
    }
}

/// A pool of workers draining one shared FIFO queue
///
/// Same submission, batch and shutdown contract as
/// [`WorkStealingPool`](crate::pool::WorkStealingPool); the statistics
/// snapshot simply never reports stolen tasks.
///
/// # Example
///
/// ```rust
/// use threadweave::prelude::*;
///
/// # fn main() -> Result<()> {
/// let pool = SharedQueuePool::with_workers(2)?;
/// let handle = pool.submit(|| "hello")?;
/// assert_eq!(handle.get()?, "hello");
/// pool.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct SharedQueuePool {
    inner: Arc<SharedInner>,
    sender: Sender<Task>,
    receiver: Receiver<Task>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    name: String,
}

impl std::fmt::Debug for SharedQueuePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedQueuePool")
            .field("name", &self.name)
            .field("workers", &self.worker_count)
            .field("stopped", &self.inner.stop.load(Ordering::Relaxed))
            .finish()
    }
}

impl SharedQueuePool {
    /// Create a pool with one worker per hardware thread
    pub fn new() -> Result<Self> {
        Self::with_config(PoolConfig::default())
    }

    /// Create a pool with the specified number of workers (0 is coerced to 1)
    pub fn with_workers(workers: usize) -> Result<Self> {
        Self::with_config(PoolConfig::new(workers))
    }

    /// Create a pool with custom configuration
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let worker_count = config.effective_workers();

        let (sender, receiver) = unbounded::<Task>();
        let (shutdown_tx, shutdown_rx) = unbounded::<()>();

        let inner = Arc::new(SharedInner {
            stop: AtomicBool::new(false),
            counters: PoolCounters::new(),
            started: Instant::now(),
            done_lock: Mutex::new(()),
            done_cond: Condvar::new(),
        });

        let pool = Self {
            inner: Arc::clone(&inner),
            sender,
            receiver: receiver.clone(),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            worker_count,
            name: config.thread_name_prefix.clone(),
        };

        for id in 0..worker_count {
            let inner = Arc::clone(&pool.inner);
            let tasks = receiver.clone();
            let shutdown = shutdown_rx.clone();
            let strategy = config.wait_strategy.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, id))
                .spawn(move || inner.worker_loop(id, tasks, shutdown, strategy));
            match spawned {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(PoolError::spawn_with_source(
                        id,
                        "Cannot create worker thread",
                        e,
                    ));
                }
            }
        }

        Ok(pool)
    }

    /// Submit a closure and get a handle to its eventual result
    ///
    /// # Errors
    ///
    /// [`PoolError::PoolStopped`] once shutdown has begun.
    pub fn submit<F, R>(&self, f: F) -> Result<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, handle) = package(f);
        self.submit_raw(task)?;
        Ok(handle)
    }

    /// Submit a batch of closures
    ///
    /// The shared queue wakes consumers per enqueued task, so no separate
    /// bulk wake is needed; the batch still saves the per-call lifecycle
    /// check.
    pub fn submit_batch<F, R>(&self, tasks: Vec<F>) -> Result<Vec<TaskHandle<R>>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.inner.stop.load(Ordering::Acquire) {
            return Err(PoolError::pool_stopped(&self.name));
        }

        let mut handles = Vec::with_capacity(tasks.len());
        for f in tasks {
            let (task, handle) = package(f);
            self.submit_raw(task)?;
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Apply `f` to every item in parallel, blocking until all are done
    pub fn parallel_for_each<I, F>(&self, items: I, f: F) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Send + 'static,
        F: Fn(I::Item) + Send + Sync + 'static,
    {
        parallel_for_each_on(self, items, f)
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.worker_count
    }

    /// Tasks buffered but not yet started (best-effort)
    pub fn pending_tasks(&self) -> usize {
        self.receiver.len()
    }

    /// Whether shutdown has begun
    pub fn is_stopped(&self) -> bool {
        self.inner.stop.load(Ordering::Acquire)
    }

    /// Snapshot the pool's execution statistics without blocking workers
    pub fn get_statistics(&self) -> PoolStats {
        self.inner
            .counters
            .snapshot(self.worker_count, self.receiver.len(), self.inner.started)
    }

    /// Block until every task accepted so far has finished
    ///
    /// After shutdown has discarded queued tasks the wait ends once the
    /// in-flight ones are done.
    pub fn wait_for_tasks(&self) {
        let counters = &self.inner.counters;
        let mut guard = self.inner.done_lock.lock();
        loop {
            // Read submitted before completed: completed >= submitted then
            // proves every task counted in `submitted` has finished, even
            // while one is between dequeue and execution.
            let submitted = counters.submitted.load(Ordering::Acquire);
            let completed = counters.completed.load(Ordering::Acquire);
            if completed >= submitted {
                break;
            }
            if self.inner.stop.load(Ordering::Acquire)
                && self.receiver.is_empty()
                && counters.active.load(Ordering::Acquire) == 0
            {
                // Discarded tasks never complete.
                break;
            }
            self.inner.done_cond.wait(&mut guard);
        }
    }

    /// Stop accepting work, wake all workers, and join them
    ///
    /// Idempotent. In-flight tasks finish; queued tasks are discarded and
    /// their handles report [`PoolError::TaskDropped`].
    pub fn shutdown(&self) {
        if self.inner.stop.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the shutdown sender disconnects every worker's shutdown
        // receiver, waking the event-driven waiters.
        *self.shutdown_tx.lock() = None;

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                error!("worker thread of pool '{}' panicked during shutdown", self.name);
            }
        }

        while self.receiver.try_recv().is_ok() {}

        drop(self.inner.done_lock.lock());
        self.inner.done_cond.notify_all();

        debug!("pool '{}' shut down", self.name);
    }

    fn submit_raw(&self, task: Task) -> Result<()> {
        if self.inner.stop.load(Ordering::Acquire) {
            return Err(PoolError::pool_stopped(&self.name));
        }
        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.sender.send(task).map_err(|_| {
            self.inner.counters.submitted.fetch_sub(1, Ordering::Relaxed);
            PoolError::pool_stopped(&self.name)
        })
    }
}

impl WorkerPool for SharedQueuePool {
    fn submit_task(&self, task: Task) -> Result<()> {
        self.submit_raw(task)
    }

    fn size(&self) -> usize {
        SharedQueuePool::size(self)
    }

    fn pending_tasks(&self) -> usize {
        SharedQueuePool::pending_tasks(self)
    }

    fn wait_for_tasks(&self) {
        SharedQueuePool::wait_for_tasks(self)
    }

    fn shutdown(&self) {
        SharedQueuePool::shutdown(self)
    }
}

impl Drop for SharedQueuePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
