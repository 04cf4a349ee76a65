//! Queue module: the facade plus admission, lifecycle, retry and result
//! stream pieces.
//!
//! ```ignore
//! let queue = Queue::with(4, 3, Duration::from_millis(100))?;
//! queue.run()?;
//!
//! let mut stream = queue.do_task(|| async { cache.set("k", "v").await }).await?;
//! while let Some(result) = stream.recv().await {
//!     // intermediate failures have done=false; the last result has done=true
//! }
//!
//! queue.finish().await?;
//! queue.join().await?;
//! ```
//!
//! # Cancellation is cooperative
//! Eviction cancels a task's token, but the token is only checked when the
//! task is about to report a result. An operation that has started always
//! runs to completion; an evicted task just stops reporting.

mod admission;
pub(crate) mod retry;
mod state;
mod stream;

pub use retry::RetryPolicy;
pub use state::{AbandonReason, Lifecycle, TaskOutcome};
pub use stream::ResultStream;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::domain::{Blocking, Operation, Task, TaskId};
use crate::error::{OperationError, QueueError};
use crate::observability::{Counters, QueueStats};
use crate::worker::{Handoff, WorkerGroup};
use admission::Admission;
use state::LifecycleGuard;

/// Bounded in-process task queue.
///
/// Cheap to clone; clones share the same workers and state.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<Inner>,
}

struct Inner {
    config: QueueConfig,
    policy: RetryPolicy,
    lifecycle: LifecycleGuard,
    admission: Admission,
    counters: Arc<Counters>,
    /// Taken (dropped) by `finish`, which closes the handoff channel.
    handoff_tx: Mutex<Option<mpsc::Sender<Handoff>>>,
    /// Taken by `run` and moved into the worker group.
    handoff_rx: Mutex<Option<mpsc::Receiver<Handoff>>>,
    workers: Mutex<Option<WorkerGroup>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Queue {
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;

        // Capacity 1 plus the ack below gives rendezvous semantics: do_task
        // returns only once a worker has taken the task.
        let (handoff_tx, handoff_rx) = mpsc::channel(1);

        Ok(Self {
            inner: Arc::new(Inner {
                policy: RetryPolicy::from_config(&config),
                lifecycle: LifecycleGuard::new(),
                admission: Admission::new(config.workers, config.prune_completed),
                counters: Arc::new(Counters::default()),
                handoff_tx: Mutex::new(Some(handoff_tx)),
                handoff_rx: Mutex::new(Some(handoff_rx)),
                workers: Mutex::new(None),
                config,
            }),
        })
    }

    pub fn with(workers: usize, retries: u32, sleep: Duration) -> Result<Self, QueueError> {
        Self::new(QueueConfig::new(workers, retries, sleep))
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn state(&self) -> Lifecycle {
        self.inner.lifecycle.current()
    }

    /// Start exactly `workers` worker loops on the current tokio runtime.
    ///
    /// Must be called before `do_task`. A second call fails with
    /// `AlreadyRunning`; a call after `finish` fails with `Closed`.
    pub fn run(&self) -> Result<(), QueueError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(QueueError::NoRuntime);
        }
        self.inner.lifecycle.start()?;

        let rx = lock(&self.inner.handoff_rx)
            .take()
            .ok_or(QueueError::AlreadyRunning)?;
        let group = WorkerGroup::spawn(
            self.inner.config.workers,
            rx,
            self.inner.policy,
            Arc::clone(&self.inner.counters),
        );
        *lock(&self.inner.workers) = Some(group);

        info!(
            workers = self.inner.config.workers,
            retries = self.inner.policy.retries,
            sleep = ?self.inner.policy.sleep,
            "queue running"
        );
        Ok(())
    }

    /// Submit an operation and wait until a worker takes it.
    ///
    /// May evict (cancel) the oldest tracked task when the admission ring
    /// is full. The returned stream yields one result per failed attempt
    /// that still has retries left, then one terminal result, then closes.
    /// An evicted task's stream may close with no results at all.
    pub async fn do_task<O: Operation>(&self, operation: O) -> Result<ResultStream, QueueError> {
        self.submit(Box::new(operation)).await
    }

    /// `do_task` for a synchronous operation. Each attempt runs on tokio's
    /// blocking pool.
    pub async fn do_blocking<F, E>(&self, f: F) -> Result<ResultStream, QueueError>
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: Into<OperationError> + 'static,
    {
        self.do_task(Blocking::new(f)).await
    }

    async fn submit(&self, operation: Box<dyn Operation>) -> Result<ResultStream, QueueError> {
        let inner = &self.inner;
        let _in_flight = inner.lifecycle.enter()?;
        let sender = lock(&inner.handoff_tx).clone().ok_or(QueueError::Closed)?;

        let (results_tx, results_rx) = mpsc::channel(1);
        let task = Task::new(operation, results_tx);
        let task_id = task.id();
        let stream = ResultStream::new(task_id, results_rx, task.cancel.clone());

        let admitted = inner.admission.admit(task.handle());
        inner.counters.submitted();
        if let Some(evicted) = admitted.evicted {
            inner.counters.evicted();
            warn!(%task_id, evicted = %evicted.id(), "admission ring full; cancelled oldest task");
        }
        if admitted.pruned > 0 {
            debug!(%task_id, pruned = admitted.pruned, "pruned finished tasks");
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        sender
            .send((task, ack_tx))
            .await
            .map_err(|_| QueueError::Closed)?;
        ack_rx.await.map_err(|_| QueueError::Closed)?;

        debug!(%task_id, "task handed off");
        Ok(stream)
    }

    /// Stop accepting tasks, wait for in-flight `do_task` handoffs, then
    /// close the handoff channel. Irreversible.
    ///
    /// Workers finish what they already took; use `join` to wait for them.
    pub async fn finish(&self) -> Result<(), QueueError> {
        let inner = &self.inner;
        let previous = inner.lifecycle.begin_drain()?;
        info!(in_flight = inner.lifecycle.in_flight(), "queue draining");

        inner.lifecycle.wait_drained().await;

        let tx = lock(&inner.handoff_tx).take();
        drop(tx);
        let rx = lock(&inner.handoff_rx).take();
        drop(rx);
        inner.lifecycle.close();

        info!(?previous, "queue closed");
        Ok(())
    }

    /// Wait for all workers to exit. Only valid after `finish`.
    pub async fn join(&self) -> Result<(), QueueError> {
        if !self.state().is_finishing() {
            return Err(QueueError::NotFinished);
        }
        let group = lock(&self.inner.workers).take();
        if let Some(group) = group {
            group.join().await;
        }
        Ok(())
    }

    /// Ids tracked by the admission controller, oldest first.
    pub fn tracked(&self) -> Vec<TaskId> {
        self.inner.admission.snapshot()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = &self.inner;
        inner.counters.snapshot(
            inner.lifecycle.current(),
            inner.config.workers,
            inner.admission.len(),
            inner.lifecycle.in_flight(),
        )
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_config() {
        assert!(matches!(
            Queue::with(0, 3, Duration::ZERO),
            Err(QueueError::InvalidConfig(_))
        ));
        assert!(matches!(
            Queue::with(2, 0, Duration::ZERO),
            Err(QueueError::InvalidConfig(_))
        ));
    }

    #[test]
    fn run_outside_runtime_is_an_error() {
        let queue = Queue::with(1, 1, Duration::ZERO).unwrap();
        assert!(matches!(queue.run(), Err(QueueError::NoRuntime)));
        assert_eq!(queue.state(), Lifecycle::Created);
    }

    #[tokio::test]
    async fn do_before_run_is_an_error() {
        let queue = Queue::with(1, 1, Duration::ZERO).unwrap();
        let err = queue
            .do_task(|| async { Ok::<(), OperationError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotRunning(Lifecycle::Created)));
        assert_eq!(queue.stats().submitted, 0);
        assert!(queue.tracked().is_empty());
    }

    #[tokio::test]
    async fn run_twice_is_an_error() {
        let queue = Queue::with(1, 1, Duration::ZERO).unwrap();
        queue.run().unwrap();
        assert!(matches!(queue.run(), Err(QueueError::AlreadyRunning)));
        queue.finish().await.unwrap();
        queue.join().await.unwrap();
    }

    #[tokio::test]
    async fn finish_is_irreversible() {
        let queue = Queue::with(2, 1, Duration::ZERO).unwrap();
        queue.run().unwrap();
        queue.finish().await.unwrap();

        assert_eq!(queue.state(), Lifecycle::Closed);
        assert!(matches!(queue.finish().await, Err(QueueError::Closed)));
        assert!(matches!(queue.run(), Err(QueueError::Closed)));
        let err = queue
            .do_task(|| async { Ok::<(), OperationError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Closed));
        queue.join().await.unwrap();
    }

    #[tokio::test]
    async fn finish_without_run_closes() {
        let queue = Queue::with(2, 1, Duration::ZERO).unwrap();
        queue.finish().await.unwrap();
        assert_eq!(queue.state(), Lifecycle::Closed);
        assert!(matches!(queue.run(), Err(QueueError::Closed)));
        queue.join().await.unwrap();
    }

    #[tokio::test]
    async fn join_before_finish_is_an_error() {
        let queue = Queue::with(1, 1, Duration::ZERO).unwrap();
        queue.run().unwrap();
        assert!(matches!(queue.join().await, Err(QueueError::NotFinished)));
        queue.finish().await.unwrap();
        queue.join().await.unwrap();
    }

    #[tokio::test]
    async fn blocking_operations_are_retried() {
        let queue = Queue::with(1, 3, Duration::ZERO).unwrap();
        queue.run().unwrap();

        let mut calls = 0;
        let stream = queue
            .do_blocking(move || {
                calls += 1;
                if calls < 2 { Err("cache unavailable") } else { Ok(()) }
            })
            .await
            .unwrap();
        let results = stream.collect().await;

        assert_eq!(results.len(), 2);
        assert!(!results[0].done);
        assert!(results[1].is_success());

        queue.finish().await.unwrap();
        queue.join().await.unwrap();
        assert_eq!(queue.stats().succeeded, 1);
    }
}
