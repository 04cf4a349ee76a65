//! Retry engine: runs one task's attempts with a fixed backoff.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::state::{AbandonReason, TaskOutcome};
use crate::config::QueueConfig;
use crate::domain::{Task, TaskResult};

/// Fixed-backoff retry policy.
///
/// The delay is constant and applied only between attempts, never after
/// the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts per task. Values below 1 behave as 1.
    pub retries: u32,

    /// Sleep between attempts.
    pub sleep: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, sleep: Duration) -> Self {
        Self { retries, sleep }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.retries, config.sleep())
    }

    /// Is `attempt` (1-indexed) the last one allowed?
    pub fn is_last(&self, attempt: u32) -> bool {
        attempt >= self.retries
    }
}

enum Delivery {
    Sent,
    Abandoned(AbandonReason),
}

/// Send `result` unless the task is cancelled first.
///
/// This and the terminal delivery are the only points where cancellation is
/// observed. When both are ready, cancellation wins.
async fn deliver(
    cancel: &CancellationToken,
    results: &mpsc::Sender<TaskResult>,
    result: TaskResult,
) -> Delivery {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Delivery::Abandoned(AbandonReason::Cancelled),
        sent = results.send(result) => match sent {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Abandoned(AbandonReason::ReceiverDropped),
        },
    }
}

/// Run `task` to completion. Dropping the task at the end closes its
/// result stream on every path.
pub(crate) async fn execute(mut task: Task, policy: RetryPolicy) -> TaskOutcome {
    let mut attempt = 0;

    let last = loop {
        attempt += 1;
        debug!(task_id = %task.id, attempt, "invoking operation");

        let err = match task.operation.call().await {
            Ok(()) => break TaskResult::success(attempt),
            Err(err) => err,
        };

        debug!(task_id = %task.id, attempt, error = %err, "attempt failed");
        let mut result = TaskResult::failure(attempt, err);
        if policy.is_last(attempt) {
            result.done = true;
            break result;
        }

        if let Delivery::Abandoned(reason) = deliver(&task.cancel, &task.results, result).await {
            warn!(task_id = %task.id, attempt, ?reason, "task abandoned");
            return TaskOutcome::Abandoned { attempt, reason };
        }

        if !policy.sleep.is_zero() {
            tokio::time::sleep(policy.sleep).await;
        }
    };

    let succeeded = last.is_success();
    match deliver(&task.cancel, &task.results, last).await {
        Delivery::Sent if succeeded => TaskOutcome::Succeeded { attempts: attempt },
        Delivery::Sent => TaskOutcome::Failed { attempts: attempt },
        Delivery::Abandoned(reason) => {
            warn!(task_id = %task.id, attempt, ?reason, "terminal result not delivered");
            TaskOutcome::Abandoned { attempt, reason }
        }
    }
}
