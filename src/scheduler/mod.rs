//! Timer-driven scheduler layered over any worker pool
//!
//! One dedicated timer thread owns a time-ordered collection of pending
//! entries. At each entry's deadline the task is handed to the owned pool
//! for actual execution; periodic entries are re-inserted at fixed-rate
//! offsets from their *scheduled* (not actual) previous deadline, so a
//! late firing is followed by back-to-back catch-up firings rather than a
//! shifted cadence.

use crate::core::{PoolError, Result};
use crate::pool::{SharedQueuePool, WorkStealingPool, WorkerPool};
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Scheduler over the work-stealing pool
pub type ScheduledPool = Scheduler<WorkStealingPool>;

/// Scheduler over the single-queue pool
pub type ScheduledSharedPool = Scheduler<SharedQueuePool>;

type ScheduledFn = Arc<dyn Fn() + Send + Sync>;

/// Cancellation handle for a scheduled task
///
/// The handle shares a cancellation flag with its scheduler entry; the
/// flag outlives both sides, so cancelling is safe even after the timer
/// thread has consumed the entry. Cancellation is cooperative: a task body
/// already running inside a worker finishes, but no further firing starts
/// once the flag has been observed.
#[derive(Debug, Clone)]
pub struct ScheduledTaskHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl ScheduledTaskHandle {
    /// Cancel the scheduled task; idempotent and thread-safe
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether this task has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Scheduler-assigned id of this task
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct ScheduledEntry {
    interval: Duration,
    task: ScheduledFn,
    cancelled: Arc<AtomicBool>,
    periodic: bool,
}

struct TimerInner {
    /// Keyed by (deadline, id): a multimap in BTreeMap clothing. Entries
    /// sharing a deadline fire in insertion order.
    queue: Mutex<BTreeMap<(Instant, u64), ScheduledEntry>>,
    cond: Condvar,
    stop: AtomicBool,
    next_id: AtomicU64,
}

impl TimerInner {
    fn insert(&self, deadline: Instant, entry: ScheduledEntry) -> ScheduledTaskHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = ScheduledTaskHandle {
            id,
            cancelled: Arc::clone(&entry.cancelled),
        };
        self.queue.lock().insert((deadline, id), entry);
        self.cond.notify_one();
        handle
    }

    fn timer_loop<P: WorkerPool>(&self, pool: &P) {
        debug!("timer thread started");
        loop {
            let mut queue = self.queue.lock();

            loop {
                if self.stop.load(Ordering::Acquire) {
                    return;
                }
                if !queue.is_empty() {
                    break;
                }
                self.cond.wait(&mut queue);
            }

            let key = match queue.first_key_value() {
                Some((key, _)) => *key,
                None => continue,
            };
            let (deadline, id) = key;

            if deadline > Instant::now() {
                // Woken early by an insertion, a cancellation or shutdown;
                // re-peek, the earliest entry may have changed.
                let _ = self.cond.wait_until(&mut queue, deadline);
                if self.stop.load(Ordering::Acquire) {
                    return;
                }
                continue;
            }

            let entry = match queue.remove(&key) {
                Some(entry) => entry,
                None => continue,
            };

            if entry.cancelled.load(Ordering::Acquire) {
                continue;
            }

            let task = Arc::clone(&entry.task);
            let flag = Arc::clone(&entry.cancelled);
            // Second cancellation check inside the pool: cancel() may race
            // with this hand-off, and a flag observed there keeps the body
            // from running at all.
            let submitted = pool.submit_task(Box::new(move || {
                if !flag.load(Ordering::Acquire) {
                    task();
                }
            }));
            match submitted {
                Ok(()) => {
                    if entry.periodic && !entry.cancelled.load(Ordering::Acquire) {
                        // Fixed-rate: offset from the scheduled deadline,
                        // never from now, so overdue entries catch up
                        // back-to-back.
                        queue.insert((deadline + entry.interval, id), entry);
                    }
                }
                Err(e) => {
                    // Pool mid-shutdown; the entry is dropped and the
                    // timer thread itself survives.
                    debug!("dropping scheduled task {}: {}", id, e);
                }
            }
        }
    }
}

/// Schedules delayed and periodic tasks onto an owned worker pool
///
/// Generic over any [`WorkerPool`]; exactly one timer thread exists per
/// scheduler regardless of how many tasks are pending.
///
/// # Example
///
/// ```rust
/// use threadweave::prelude::*;
/// use std::time::Duration;
///
/// # fn main() -> Result<()> {
/// let scheduler = ScheduledPool::with_workers(2)?;
///
/// let handle = scheduler.schedule_after(Duration::from_millis(10), || {
///     println!("fired once");
/// });
///
/// let ticker = scheduler.schedule_periodic(Duration::from_millis(50), || {
///     println!("tick");
/// });
///
/// std::thread::sleep(Duration::from_millis(120));
/// ticker.cancel();
/// # let _ = handle;
/// scheduler.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct Scheduler<P: WorkerPool + 'static> {
    pool: Arc<P>,
    inner: Arc<TimerInner>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<P: WorkerPool + 'static> Scheduler<P> {
    /// Wrap a pool and start the timer thread
    pub fn new(pool: P) -> Result<Self> {
        let pool = Arc::new(pool);
        let inner = Arc::new(TimerInner {
            queue: Mutex::new(BTreeMap::new()),
            cond: Condvar::new(),
            stop: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        });

        let timer = {
            let pool = Arc::clone(&pool);
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name("weave-timer".to_string())
                .spawn(move || inner.timer_loop(pool.as_ref()))
                .map_err(|e| {
                    PoolError::spawn_with_source(0, "Cannot create timer thread", e)
                })?
        };

        Ok(Self {
            pool,
            inner,
            timer: Mutex::new(Some(timer)),
        })
    }

    /// Schedule a one-shot task to run after `delay`
    pub fn schedule_after<F>(&self, delay: Duration, task: F) -> ScheduledTaskHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule_at(Instant::now() + delay, task)
    }

    /// Schedule a one-shot task to run at `time`
    pub fn schedule_at<F>(&self, time: Instant, task: F) -> ScheduledTaskHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.insert(
            time,
            ScheduledEntry {
                interval: Duration::ZERO,
                task: Arc::new(task),
                cancelled: Arc::new(AtomicBool::new(false)),
                periodic: false,
            },
        )
    }

    /// Schedule a task to run periodically, starting immediately
    ///
    /// Equivalent to [`schedule_periodic_after`](Self::schedule_periodic_after)
    /// with a zero initial delay.
    pub fn schedule_periodic<F>(&self, interval: Duration, task: F) -> ScheduledTaskHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule_periodic_after(Duration::ZERO, interval, task)
    }

    /// Schedule a periodic task with an initial delay
    ///
    /// First run at `now + initial_delay`; every subsequent deadline is the
    /// previous *scheduled* deadline plus `interval` (fixed-rate). A firing
    /// that runs late does not shift the cadence: the scheduler fires the
    /// overdue deadlines back-to-back to catch up, and never coalesces
    /// skipped runs into one.
    pub fn schedule_periodic_after<F>(
        &self,
        initial_delay: Duration,
        interval: Duration,
        task: F,
    ) -> ScheduledTaskHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.insert(
            Instant::now() + initial_delay,
            ScheduledEntry {
                interval,
                task: Arc::new(task),
                cancelled: Arc::new(AtomicBool::new(false)),
                periodic: true,
            },
        )
    }

    /// Cancel a scheduled task and nudge the timer thread
    ///
    /// Equivalent to `handle.cancel()` plus an early wake-up of the timer
    /// thread; idempotent either way.
    pub fn cancel(&self, handle: &ScheduledTaskHandle) {
        handle.cancel();
        self.inner.cond.notify_one();
    }

    /// Number of pending scheduled entries (periodic ones count once)
    pub fn scheduled_count(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// The owned pool, for ad hoc direct submission
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Stop the timer thread, then shut down the owned pool
    ///
    /// Idempotent. Tasks already handed to the pool follow the pool's own
    /// shutdown semantics.
    pub fn shutdown(&self) {
        {
            let _queue = self.inner.queue.lock();
            if self.inner.stop.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        self.inner.cond.notify_all();

        if let Some(timer) = self.timer.lock().take() {
            if timer.join().is_err() {
                log::error!("timer thread panicked during shutdown");
            }
        }

        self.pool.shutdown();
    }
}

impl Scheduler<WorkStealingPool> {
    /// Scheduler over a new work-stealing pool with `workers` threads
    pub fn with_workers(workers: usize) -> Result<Self> {
        Self::new(WorkStealingPool::with_workers(workers)?)
    }
}

impl Scheduler<SharedQueuePool> {
    /// Scheduler over a new single-queue pool with `workers` threads
    pub fn with_workers(workers: usize) -> Result<Self> {
        Self::new(SharedQueuePool::with_workers(workers)?)
    }
}

impl<P: WorkerPool + 'static> Drop for Scheduler<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
