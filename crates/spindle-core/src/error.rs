use thiserror::Error;

use crate::queue::Lifecycle;

/// Error returned by a submitted operation.
///
/// Operation errors never surface as `QueueError`; they travel through the
/// task's `ResultStream` instead.
pub type OperationError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Usage errors of the queue facade.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is not running (state={0:?}); call run() first")]
    NotRunning(Lifecycle),

    #[error("queue is already running")]
    AlreadyRunning,

    #[error("queue is closed")]
    Closed,

    #[error("queue has not been finished; call finish() before join()")]
    NotFinished,

    #[error("run() must be called from within a tokio runtime")]
    NoRuntime,

    #[error("invalid queue config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value:?}")]
    Env { key: &'static str, value: String },
}
