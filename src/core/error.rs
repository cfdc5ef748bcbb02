//! Error types for the pool and scheduler layers

/// Result type for pool and scheduler operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors that can occur in the pool and scheduler layers
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Pool has been shut down and no longer accepts submissions
    #[error("Pool '{pool_name}' is stopped and no longer accepts tasks")]
    PoolStopped {
        /// Name of the pool
        pool_name: String,
    },

    /// Failed to spawn a worker thread with details
    #[error("Failed to spawn worker thread #{worker_id}: {message}")]
    SpawnError {
        /// ID of the worker that failed to spawn
        worker_id: usize,
        /// Error message
        message: String,
        /// Source IO error
        #[source]
        source: Option<std::io::Error>,
    },

    /// Failed to join a worker thread
    #[error("Failed to join worker thread #{worker_id}: {message}")]
    JoinError {
        /// ID of the worker that failed to join
        worker_id: usize,
        /// Error message
        message: String,
    },

    /// Task body panicked while executing
    #[error("Task panicked: {message}")]
    TaskPanicked {
        /// Panic payload rendered as a string
        message: String,
    },

    /// Task was discarded before a worker ever ran it
    #[error("Task was dropped before execution (pool shut down)")]
    TaskDropped,

    /// Task execution failed with an application error
    #[error("Task execution failed: {message}")]
    ExecutionError {
        /// Error message
        message: String,
    },

    /// Waiting on a completion handle timed out
    #[error("Timed out after {timeout_ms}ms waiting for a task result")]
    WaitTimeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Invalid configuration with parameter
    #[error("Invalid configuration for '{parameter}': {message}")]
    InvalidConfig {
        /// Configuration parameter name
        parameter: String,
        /// Error message
        message: String,
    },

    /// General error
    #[error("{0}")]
    Other(String),
}

impl PoolError {
    /// Create a pool stopped error
    pub fn pool_stopped(pool_name: impl Into<String>) -> Self {
        PoolError::PoolStopped {
            pool_name: pool_name.into(),
        }
    }

    /// Create a spawn error
    pub fn spawn(worker_id: usize, message: impl Into<String>) -> Self {
        PoolError::SpawnError {
            worker_id,
            message: message.into(),
            source: None,
        }
    }

    /// Create a spawn error with source
    pub fn spawn_with_source(
        worker_id: usize,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        PoolError::SpawnError {
            worker_id,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a join error
    pub fn join(worker_id: usize, message: impl Into<String>) -> Self {
        PoolError::JoinError {
            worker_id,
            message: message.into(),
        }
    }

    /// Create a task panicked error
    pub fn panicked(message: impl Into<String>) -> Self {
        PoolError::TaskPanicked {
            message: message.into(),
        }
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        PoolError::ExecutionError {
            message: message.into(),
        }
    }

    /// Create a wait timeout error
    pub fn wait_timeout(timeout_ms: u64) -> Self {
        PoolError::WaitTimeout { timeout_ms }
    }

    /// Create an invalid config error
    pub fn invalid_config(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        PoolError::InvalidConfig {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        PoolError::Other(msg.into())
    }
}
