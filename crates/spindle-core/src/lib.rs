//! spindle-core
//!
//! In-process task queue: a fixed pool of workers runs fallible operations
//! with fixed-backoff retries and streams every attempt's outcome back to
//! the caller.
//!
//! # Modules
//! - **domain**: task ids, tasks, operations, results
//! - **queue**: the `Queue` facade plus admission, lifecycle, retry engine
//!   and result streams
//! - **worker**: the worker pool
//! - **config**: `QueueConfig` (JSON + env)
//! - **observability**: `QueueStats`
//! - **error**: `QueueError`, `ConfigError`, `OperationError`

pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod queue;
mod worker;

pub use config::QueueConfig;
pub use domain::{Blocking, Operation, TaskId, TaskResult};
pub use error::{ConfigError, OperationError, QueueError};
pub use observability::QueueStats;
pub use queue::{Lifecycle, Queue, ResultStream, RetryPolicy};
