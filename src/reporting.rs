//! Error-reporting decorator over any worker pool
//!
//! Wraps a pool so that every failure of a fallible task (an `Err` return
//! or a panic) is handed to registered callbacks before it reaches the
//! task's completion handle. The failure itself is forwarded unchanged;
//! the callbacks only observe, they never swallow.

use crate::core::task::{package_fallible, panic_message, TaskHandle};
use crate::core::{PoolError, Result};
use crate::pool::WorkerPool;
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// What a failure callback gets to see about one failed task
#[derive(Debug, Clone)]
pub struct TaskFailure {
    /// Rendered failure cause
    pub message: String,
    /// Name of the worker thread the task ran on
    pub worker: String,
    /// Caller-supplied description, if the task was submitted with one
    pub description: Option<String>,
    /// When the failure was observed
    pub timestamp: DateTime<Local>,
}

/// Callback invoked for every failed task
pub type ErrorCallback = Box<dyn Fn(&TaskFailure) + Send + Sync>;

struct CallbackRegistry {
    callbacks: RwLock<Vec<(usize, ErrorCallback)>>,
    next_id: AtomicUsize,
    errors: AtomicU64,
}

impl CallbackRegistry {
    fn new() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            errors: AtomicU64::new(0),
        }
    }

    fn report(&self, failure: &TaskFailure) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        for (_, callback) in self.callbacks.read().iter() {
            callback(failure);
        }
    }
}

/// A pool decorator that routes task failures through error callbacks
///
/// # Example
///
/// ```rust
/// use threadweave::prelude::*;
///
/// # fn main() -> Result<()> {
/// let pool = ReportingPool::new(WorkStealingPool::with_workers(2)?);
///
/// pool.add_error_callback(|failure| {
///     eprintln!("[{}] {} failed: {}", failure.timestamp, failure.worker, failure.message);
/// });
///
/// let handle = pool.submit(|| -> Result<()> {
///     Err(PoolError::execution("disk full"))
/// })?;
///
/// // The callback has been (or will be) invoked; the failure still
/// // reaches the handle unchanged.
/// assert!(handle.get().is_err());
/// assert_eq!(pool.error_count(), 1);
/// # pool.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct ReportingPool<P: WorkerPool> {
    pool: P,
    registry: Arc<CallbackRegistry>,
}

impl<P: WorkerPool> ReportingPool<P> {
    /// Decorate a pool with failure reporting
    pub fn new(pool: P) -> Self {
        Self {
            pool,
            registry: Arc::new(CallbackRegistry::new()),
        }
    }

    /// Submit a fallible task with automatic failure reporting
    pub fn submit<F, R>(&self, f: F) -> Result<TaskHandle<R>>
    where
        F: FnOnce() -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.submit_inner(None, f)
    }

    /// Submit a fallible task with a description for richer failure reports
    pub fn submit_with_description<F, R>(
        &self,
        description: impl Into<String>,
        f: F,
    ) -> Result<TaskHandle<R>>
    where
        F: FnOnce() -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.submit_inner(Some(description.into()), f)
    }

    /// Register a failure callback; returns an id usable for removal
    pub fn add_error_callback<F>(&self, callback: F) -> usize
    where
        F: Fn(&TaskFailure) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .callbacks
            .write()
            .push((id, Box::new(callback)));
        id
    }

    /// Remove a callback by id; returns whether it was registered
    pub fn remove_error_callback(&self, id: usize) -> bool {
        let mut callbacks = self.registry.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(cb_id, _)| *cb_id != id);
        callbacks.len() != before
    }

    /// Remove every registered callback
    pub fn clear_error_callbacks(&self) {
        self.registry.callbacks.write().clear();
    }

    /// Number of failures observed so far
    pub fn error_count(&self) -> u64 {
        self.registry.errors.load(Ordering::Relaxed)
    }

    /// Reset the failure counter
    pub fn reset_error_count(&self) {
        self.registry.errors.store(0, Ordering::Relaxed);
    }

    /// The wrapped pool
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Unwrap the decorator, dropping the callback registry
    pub fn into_inner(self) -> P {
        self.pool
    }

    /// Block until no task is pending or executing in the wrapped pool
    pub fn wait_for_tasks(&self) {
        self.pool.wait_for_tasks();
    }

    /// Shut down the wrapped pool
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Worker count of the wrapped pool
    pub fn size(&self) -> usize {
        self.pool.size()
    }

    /// Pending tasks of the wrapped pool (best-effort)
    pub fn pending_tasks(&self) -> usize {
        self.pool.pending_tasks()
    }

    fn submit_inner<F, R>(&self, description: Option<String>, f: F) -> Result<TaskHandle<R>>
    where
        F: FnOnce() -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        let (task, handle) = package_fallible(move || {
            let outcome = catch_unwind(AssertUnwindSafe(f));
            let result = match outcome {
                Ok(result) => result,
                Err(payload) => Err(PoolError::panicked(panic_message(payload.as_ref()))),
            };
            if let Err(error) = &result {
                let failure = TaskFailure {
                    message: error.to_string(),
                    worker: std::thread::current()
                        .name()
                        .unwrap_or("unnamed")
                        .to_string(),
                    description,
                    timestamp: Local::now(),
                };
                log::warn!(
                    "task failed on '{}': {}",
                    failure.worker,
                    failure.message
                );
                registry.report(&failure);
            }
            result
        });
        self.pool.submit_task(task)?;
        Ok(handle)
    }
}

impl<P: WorkerPool> WorkerPool for ReportingPool<P> {
    /// Pass-through submission; failure reporting applies only to tasks
    /// submitted through [`ReportingPool::submit`] and
    /// [`ReportingPool::submit_with_description`], which wrap the closure
    /// at submission time.
    fn submit_task(&self, task: crate::core::Task) -> Result<()> {
        self.pool.submit_task(task)
    }

    fn size(&self) -> usize {
        ReportingPool::size(self)
    }

    fn pending_tasks(&self) -> usize {
        ReportingPool::pending_tasks(self)
    }

    fn wait_for_tasks(&self) {
        ReportingPool::wait_for_tasks(self)
    }

    fn shutdown(&self) {
        ReportingPool::shutdown(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkStealingPool;
    use parking_lot::Mutex;

    fn reporting_pool() -> ReportingPool<WorkStealingPool> {
        ReportingPool::new(WorkStealingPool::with_workers(2).expect("Failed to create pool"))
    }

    #[test]
    fn test_success_does_not_report() {
        let pool = reporting_pool();
        let handle = pool.submit(|| Ok(11)).expect("submit failed");
        assert_eq!(handle.get().unwrap(), 11);
        assert_eq!(pool.error_count(), 0);
        pool.shutdown();
    }

    #[test]
    fn test_error_invokes_callback_and_reaches_handle() {
        let pool = reporting_pool();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        pool.add_error_callback(move |failure| {
            seen_clone.lock().push(failure.message.clone());
        });

        let handle = pool
            .submit(|| -> Result<()> { Err(PoolError::execution("bad checksum")) })
            .expect("submit failed");

        let err = handle.get().unwrap_err();
        assert!(matches!(err, PoolError::ExecutionError { .. }));

        pool.wait_for_tasks();
        let messages = seen.lock();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("bad checksum"));
        assert_eq!(pool.error_count(), 1);
        pool.shutdown();
    }

    #[test]
    fn test_panic_is_reported_and_forwarded() {
        let pool = reporting_pool();
        let count = Arc::new(AtomicU64::new(0));

        let count_clone = Arc::clone(&count);
        pool.add_error_callback(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let handle = pool
            .submit(|| -> Result<()> { panic!("kaboom") })
            .expect("submit failed");

        assert!(matches!(handle.get(), Err(PoolError::TaskPanicked { .. })));
        pool.wait_for_tasks();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        pool.shutdown();
    }

    #[test]
    fn test_description_is_attached() {
        let pool = reporting_pool();
        let descriptions = Arc::new(Mutex::new(Vec::new()));

        let desc_clone = Arc::clone(&descriptions);
        pool.add_error_callback(move |failure| {
            desc_clone.lock().push(failure.description.clone());
        });

        let handle = pool
            .submit_with_description("nightly reindex", || -> Result<()> {
                Err(PoolError::execution("index corrupt"))
            })
            .expect("submit failed");
        let _ = handle.get();

        pool.wait_for_tasks();
        assert_eq!(
            descriptions.lock().as_slice(),
            &[Some("nightly reindex".to_string())]
        );
        pool.shutdown();
    }

    #[test]
    fn test_remove_and_clear_callbacks() {
        let pool = reporting_pool();
        let count = Arc::new(AtomicU64::new(0));

        let count_clone = Arc::clone(&count);
        let id = pool.add_error_callback(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(pool.remove_error_callback(id));
        assert!(!pool.remove_error_callback(id));

        let handle = pool
            .submit(|| -> Result<()> { Err(PoolError::execution("ignored")) })
            .expect("submit failed");
        let _ = handle.get();
        pool.wait_for_tasks();

        // Failure counted even with no callbacks registered.
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(pool.error_count(), 1);

        pool.reset_error_count();
        assert_eq!(pool.error_count(), 0);
        pool.shutdown();
    }

    #[test]
    fn test_composes_with_scheduler() {
        use crate::scheduler::Scheduler;
        use std::time::Duration;

        let scheduler = Scheduler::new(reporting_pool()).expect("Failed to create scheduler");
        let fired = Arc::new(AtomicU64::new(0));

        let fired_clone = Arc::clone(&fired);
        scheduler.schedule_after(Duration::from_millis(10), move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        scheduler.shutdown();
    }

    #[test]
    fn test_failure_records_worker_thread_name() {
        let pool = ReportingPool::new(
            WorkStealingPool::with_config(
                crate::pool::PoolConfig::new(1).with_thread_name_prefix("report-test"),
            )
            .expect("Failed to create pool"),
        );
        let workers = Arc::new(Mutex::new(Vec::new()));

        let workers_clone = Arc::clone(&workers);
        pool.add_error_callback(move |failure| {
            workers_clone.lock().push(failure.worker.clone());
        });

        let handle = pool
            .submit(|| -> Result<()> { Err(PoolError::execution("whoops")) })
            .expect("submit failed");
        let _ = handle.get();
        pool.wait_for_tasks();

        let workers = workers.lock();
        assert_eq!(workers.len(), 1);
        assert!(workers[0].starts_with("report-test-"));
        pool.shutdown();
    }
}
