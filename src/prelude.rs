//! Convenient re-exports for common types and traits

pub use crate::core::{PoolError, Result, Task, TaskHandle};
pub use crate::pool::{
    PoolConfig, PoolStats, SharedQueuePool, WaitStrategy, WorkStealingPool, WorkerPool,
};
pub use crate::reporting::{ReportingPool, TaskFailure};
pub use crate::scheduler::{ScheduledPool, ScheduledSharedPool, ScheduledTaskHandle, Scheduler};
