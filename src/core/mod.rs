//! Core types shared by every pool variant and the scheduler

pub mod error;
pub mod task;

pub use error::{PoolError, Result};
pub use task::{Task, TaskHandle};
