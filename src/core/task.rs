//! Type-erased tasks and completion handles
//!
//! A task is a zero-argument unit of work boxed into a uniform callable
//! signature. Submission wraps the caller's closure so that its result (or
//! panic) is delivered through a [`TaskHandle`] exactly once, and so that a
//! task discarded by shutdown surfaces [`PoolError::TaskDropped`] to the
//! waiter instead of leaving it blocked forever.

use crate::core::error::{PoolError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Select, Sender};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

/// A type-erased unit of work owned by a queue until a worker executes it
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Renders a panic payload as a string for error reporting
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// The caller-facing side of a submitted task's eventual outcome
///
/// One handle exists per submitted task. The pool-internal wrapper fulfills
/// it exactly once, with either the task's return value or the failure that
/// ended it. If the pool shuts down before the task ever runs, the wrapper
/// is dropped and [`get()`](Self::get) reports [`PoolError::TaskDropped`].
///
/// # Example
///
/// ```rust
/// use threadweave::prelude::*;
///
/// # fn main() -> Result<()> {
/// let pool = WorkStealingPool::with_workers(2)?;
/// let handle = pool.submit(|| 2 + 2)?;
/// assert_eq!(handle.get()?, 4);
/// # pool.shutdown();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TaskHandle<R> {
    rx: Receiver<Result<R>>,
}

impl<R> TaskHandle<R> {
    /// Block until the task finishes and take its result
    ///
    /// # Errors
    ///
    /// - [`PoolError::TaskPanicked`] - the task body panicked
    /// - [`PoolError::TaskDropped`] - the pool discarded the task before
    ///   running it (shutdown)
    /// - any error a fallible task returned
    pub fn get(self) -> Result<R> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(PoolError::TaskDropped),
        }
    }

    /// Block up to `timeout` for the task to finish and take its result
    ///
    /// Consumes the handle; a handle that timed out cannot be re-waited.
    pub fn get_timeout(self, timeout: Duration) -> Result<R> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                Err(PoolError::wait_timeout(timeout.as_millis() as u64))
            }
            Err(RecvTimeoutError::Disconnected) => Err(PoolError::TaskDropped),
        }
    }

    /// Block until the task has finished (or been discarded) without
    /// consuming the handle
    pub fn wait(&self) {
        let mut sel = Select::new();
        sel.recv(&self.rx);
        let _ = sel.ready();
    }
}

/// Write side of a [`TaskHandle`], fulfilled exactly once by the wrapper
pub(crate) struct TaskCompletion<R> {
    tx: Sender<Result<R>>,
}

impl<R> TaskCompletion<R> {
    /// Deliver the task outcome; the waiter may be gone, which is fine
    pub(crate) fn complete(self, result: Result<R>) {
        let _ = self.tx.send(result);
    }
}

/// Creates a completion/handle pair for one task
pub(crate) fn completion_pair<R>() -> (TaskCompletion<R>, TaskHandle<R>) {
    let (tx, rx) = bounded(1);
    (TaskCompletion { tx }, TaskHandle { rx })
}

/// Packages an infallible closure into a pool task plus its handle
///
/// Panics inside `f` are caught, recorded as [`PoolError::TaskPanicked`]
/// on the handle, and never escape into the worker loop.
pub(crate) fn package<F, R>(f: F) -> (Task, TaskHandle<R>)
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (completion, handle) = completion_pair();
    let task: Task = Box::new(move || {
        let outcome = catch_unwind(AssertUnwindSafe(f));
        let result = match outcome {
            Ok(value) => Ok(value),
            Err(payload) => Err(PoolError::panicked(panic_message(payload.as_ref()))),
        };
        completion.complete(result);
    });
    (task, handle)
}

/// Packages a fallible closure into a pool task plus its handle
///
/// The closure's `Err` is delivered through the handle as-is; panics are
/// converted to [`PoolError::TaskPanicked`] like [`package`].
pub(crate) fn package_fallible<F, R>(f: F) -> (Task, TaskHandle<R>)
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    let (completion, handle) = completion_pair();
    let task: Task = Box::new(move || {
        let outcome = catch_unwind(AssertUnwindSafe(f));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(PoolError::panicked(panic_message(payload.as_ref()))),
        };
        completion.complete(result);
    });
    (task, handle)
}
