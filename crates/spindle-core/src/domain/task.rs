//! Task: one submitted unit of retryable work.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{TaskId, TaskResult};
use crate::error::OperationError;

/// A fallible, zero-argument side effect.
///
/// The queue treats a call as an opaque black box: once started it always
/// runs to completion. Cancellation never interrupts it.
///
/// Any `FnMut() -> impl Future<Output = Result<(), E>>` closure implements
/// this trait, so callers rarely implement it by hand:
///
/// ```ignore
/// let stream = queue.do_task(move || {
///     let bus = bus.clone();
///     async move { bus.publish("user.created", &payload).await }
/// }).await?;
/// ```
#[async_trait]
pub trait Operation: Send + 'static {
    async fn call(&mut self) -> Result<(), OperationError>;
}

#[async_trait]
impl<F, Fut, E> Operation for F
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<OperationError> + 'static,
{
    async fn call(&mut self) -> Result<(), OperationError> {
        (self)().await.map_err(Into::into)
    }
}

/// Adapter running a synchronous closure on tokio's blocking pool, so an
/// opaque blocking call (cache client, SMTP, ...) does not stall a worker
/// thread.
pub struct Blocking<F> {
    f: Arc<Mutex<F>>,
}

impl<F> Blocking<F> {
    pub fn new(f: F) -> Self {
        Self {
            f: Arc::new(Mutex::new(f)),
        }
    }
}

#[async_trait]
impl<F, E> Operation for Blocking<F>
where
    F: FnMut() -> Result<(), E> + Send + 'static,
    E: Into<OperationError> + 'static,
{
    async fn call(&mut self) -> Result<(), OperationError> {
        let f = Arc::clone(&self.f);
        let joined = tokio::task::spawn_blocking(move || -> Result<(), OperationError> {
            let mut f = f
                .lock()
                .map_err(|_| OperationError::from("blocking operation mutex poisoned"))?;
            (*f)().map_err(Into::into)
        })
        .await;

        match joined {
            Ok(result) => result,
            // Re-raise so the worker's panic containment sees it.
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A submitted task, owned by whichever worker runs it.
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) operation: Box<dyn Operation>,
    pub(crate) results: mpsc::Sender<TaskResult>,
    pub(crate) cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl Task {
    pub(crate) fn new(
        operation: Box<dyn Operation>,
        results: mpsc::Sender<TaskResult>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            operation,
            results,
            cancel: CancellationToken::new(),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The handle the admission controller keeps. It can cancel the task and
    /// see whether it finished, nothing more.
    pub(crate) fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.id,
            cancel: self.cancel.clone(),
            finished: Arc::clone(&self.finished),
        }
    }

}

// Dropping the task drops the result sender, which closes the stream. The
// finished flag flips on every exit path, unwinding included.
impl Drop for Task {
    fn drop(&mut self) {
        self.finished.store(true, Ordering::Release);
    }
}

/// Weak-ish reference to a task, held by the admission ring.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub(crate) id: TaskId,
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}
