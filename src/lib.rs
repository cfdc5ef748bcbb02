//! # Threadweave
//!
//! Work-stealing worker pools with a timer layer for delayed and periodic
//! task execution.
//!
//! ## Features
//!
//! - **Work-stealing pool**: per-worker task buffers with randomized theft
//!   and an overflow queue, tuned for high-frequency submission
//! - **Single-queue pool**: a simpler baseline with selectable idle-wait
//!   strategy for workloads where stealing does not pay for itself
//! - **Completion handles**: every submission returns a handle carrying the
//!   task's eventual result or failure
//! - **Scheduler**: delayed, absolute-time and fixed-rate periodic
//!   execution on top of any pool, with cancellable handles
//! - **Failure isolation**: a panicking task fails its own handle and
//!   nothing else; worker loops never die
//! - **Statistics**: throughput, mean task time and steal counts computed
//!   from live counters on demand
//!
//! ## Quick Start
//!
//! ```rust
//! use threadweave::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let pool = WorkStealingPool::with_workers(4)?;
//!
//! // Submit tasks and collect results
//! let handle = pool.submit(|| 6 * 7)?;
//! assert_eq!(handle.get()?, 42);
//!
//! // Batch submission with a single bulk wake-up
//! let handles = pool.submit_batch((0..10).map(|i| move || i * 2).collect())?;
//! let doubled: Result<Vec<i32>> = handles.into_iter().map(|h| h.get()).collect();
//! assert_eq!(doubled?.len(), 10);
//!
//! pool.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Scheduled Tasks
//!
//! ```rust
//! use threadweave::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<()> {
//! let scheduler = ScheduledPool::with_workers(2)?;
//!
//! let heartbeat = scheduler.schedule_periodic(Duration::from_millis(100), || {
//!     // runs at a fixed rate; late firings catch up instead of drifting
//! });
//!
//! std::thread::sleep(Duration::from_millis(50));
//! heartbeat.cancel();
//! scheduler.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Statistics
//!
//! ```rust
//! use threadweave::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let pool = WorkStealingPool::with_workers(2)?;
//! for _ in 0..100 {
//!     pool.submit(|| ())?;
//! }
//! pool.wait_for_tasks();
//!
//! let stats = pool.get_statistics();
//! assert_eq!(stats.completed_tasks, 100);
//! assert!(stats.stolen_tasks <= stats.completed_tasks);
//! # pool.shutdown();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod pool;
pub mod prelude;
pub mod reporting;
pub mod scheduler;

pub use crate::core::{PoolError, Result, Task, TaskHandle};
pub use pool::{
    PoolConfig, PoolStats, SharedQueuePool, TaskDeque, WaitStrategy, WorkStealingPool, WorkerPool,
};
pub use reporting::{ErrorCallback, ReportingPool, TaskFailure};
pub use scheduler::{ScheduledPool, ScheduledSharedPool, ScheduledTaskHandle, Scheduler};
