//! Pool configuration

use crate::core::{PoolError, Result};
use crate::pool::buffer::DEFAULT_BUFFER_CAPACITY;
use std::time::Duration;

/// How a shared-queue worker waits when no task is available
///
/// This is a latency/CPU trade-off, not a semantic difference: both
/// strategies provide the same submission and shutdown contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Park until a task arrives or shutdown begins. Lowest CPU usage,
    /// shutdown latency bounded by the wake signal.
    Blocking,
    /// Wake on the given interval to re-check for work and shutdown.
    /// Bounds worst-case wake latency at the cost of idle polling.
    Polling(Duration),
}

impl WaitStrategy {
    /// The polling variant with its customary 10ms interval
    pub fn polling() -> Self {
        WaitStrategy::Polling(Duration::from_millis(10))
    }
}

impl Default for WaitStrategy {
    fn default() -> Self {
        WaitStrategy::Blocking
    }
}

/// Configuration shared by the pool variants
///
/// `buffer_capacity` only affects [`WorkStealingPool`], `wait_strategy`
/// only affects [`SharedQueuePool`]; the other fields apply to both.
///
/// [`WorkStealingPool`]: crate::pool::WorkStealingPool
/// [`SharedQueuePool`]: crate::pool::SharedQueuePool
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of worker threads (0 = coerced to 1)
    pub workers: usize,
    /// Capacity of each per-worker buffer
    pub buffer_capacity: usize,
    /// Thread name prefix; workers are named `{prefix}-{index}`
    pub thread_name_prefix: String,
    /// Idle wait behavior for shared-queue workers
    pub wait_strategy: WaitStrategy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            thread_name_prefix: "weave-worker".to_string(),
            wait_strategy: WaitStrategy::default(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the specified number of workers
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Set the per-worker buffer capacity
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Set the thread name prefix
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the idle wait strategy for shared-queue workers
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_wait_strategy(mut self, strategy: WaitStrategy) -> Self {
        self.wait_strategy = strategy;
        self
    }

    /// Number of workers after coercion; never zero
    pub(crate) fn effective_workers(&self) -> usize {
        self.workers.max(1)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(PoolError::invalid_config(
                "buffer_capacity",
                "Buffer capacity must be greater than 0",
            ));
        }
        if let WaitStrategy::Polling(interval) = self.wait_strategy {
            if interval.is_zero() {
                return Err(PoolError::invalid_config(
                    "wait_strategy",
                    "Polling interval must be non-zero",
                ));
            }
        }
        Ok(())
    }
}
