//! Result stream handed back by `Queue::do_task`.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::domain::{TaskId, TaskResult};

/// The ordered results of one task, ending when the channel closes.
///
/// Closure is the only "finished" signal. A stream that closes without any
/// result means the task was discarded under load (see `is_cancelled`), not
/// that it succeeded.
#[derive(Debug)]
pub struct ResultStream {
    task_id: TaskId,
    rx: mpsc::Receiver<TaskResult>,
    cancel: CancellationToken,
}

impl ResultStream {
    pub(crate) fn new(
        task_id: TaskId,
        rx: mpsc::Receiver<TaskResult>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            rx,
            cancel,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Next result, or `None` once the stream is closed. Calling it again
    /// after closure keeps returning `None` immediately.
    pub async fn recv(&mut self) -> Option<TaskResult> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<TaskResult, TryRecvError> {
        self.rx.try_recv()
    }

    /// Drain the stream until it closes.
    pub async fn collect(mut self) -> Vec<TaskResult> {
        let mut results = Vec::new();
        while let Some(result) = self.recv().await {
            results.push(result);
        }
        results
    }

    /// Whether the admission controller evicted this task.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
