use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::domain::Task;
use crate::observability::Counters;
use crate::queue::RetryPolicy;
use crate::queue::retry;

/// A task plus the acknowledgement the submitter waits on.
pub(crate) type Handoff = (Task, oneshot::Sender<()>);

/// Worker group handle.
/// - ワーカーは handoff channel が閉じて空になると終了する
/// - `join()` で全ワーカーの終了を待てる
pub(crate) struct WorkerGroup {
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing one handoff receiver.
    pub(crate) fn spawn(
        n: usize,
        handoff: mpsc::Receiver<Handoff>,
        policy: RetryPolicy,
        counters: Arc<Counters>,
    ) -> Self {
        let handoff = Arc::new(Mutex::new(handoff));

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let rx = Arc::clone(&handoff);
            let counters = Arc::clone(&counters);
            let span = info_span!("worker", worker_id);

            let join = tokio::spawn(worker_loop(worker_id, rx, policy, counters).instrument(span));
            joins.push(join);
        }

        Self { joins }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.joins.len()
    }

    /// Wait for all workers. Only returns once the handoff channel is closed.
    pub(crate) async fn join(self) {
        for (worker_id, join) in self.joins.into_iter().enumerate() {
            if let Err(e) = join.await {
                warn!(worker_id, error = %e, "worker exited abnormally");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    handoff: Arc<Mutex<mpsc::Receiver<Handoff>>>,
    policy: RetryPolicy,
    counters: Arc<Counters>,
) {
    debug!(worker_id, "worker started");
    loop {
        // 受信中だけロックを持つ。タスク実行中は他のワーカーが受信できる
        let next = {
            let mut rx = handoff.lock().await;
            rx.recv().await
        };

        let Some((task, ack)) = next else {
            break;
        };

        let task_id = task.id();
        if ack.send(()).is_err() {
            // submitter gave up before the handoff completed; nobody holds
            // the stream, so the task never runs
            debug!(worker_id, %task_id, "submitter went away; dropping task");
            continue;
        }
        counters.dispatched();
        debug!(worker_id, %task_id, "task received");

        // Run on its own tokio task so a panicking operation cannot take the
        // worker down with it. Still awaited: one task per worker at a time.
        let run = tokio::spawn(retry::execute(task, policy).in_current_span());
        match run.await {
            Ok(outcome) => {
                debug!(worker_id, %task_id, ?outcome, "task finished");
                counters.record(&outcome);
            }
            Err(e) if e.is_panic() => {
                error!(worker_id, %task_id, "operation panicked; result stream closed");
                counters.panicked();
            }
            Err(e) => {
                warn!(worker_id, %task_id, error = %e, "task run cancelled");
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::OperationError;
    use crate::queue::ResultStream;

    fn handoff_task(
        op: impl crate::domain::Operation,
    ) -> (Handoff, ResultStream, oneshot::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        let task = Task::new(Box::new(op), tx);
        let stream = ResultStream::new(task.id(), rx, task.cancel.clone());
        let (ack_tx, ack_rx) = oneshot::channel();
        ((task, ack_tx), stream, ack_rx)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn workers_exit_when_handoff_closes() {
        let (tx, rx) = mpsc::channel::<Handoff>(1);
        let counters = Arc::new(Counters::default());
        let group = WorkerGroup::spawn(3, rx, RetryPolicy::new(1, Duration::ZERO), counters);
        assert_eq!(group.len(), 3);

        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), group.join())
            .await
            .expect("workers should stop");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_operation_does_not_kill_worker() {
        let (tx, rx) = mpsc::channel::<Handoff>(1);
        let counters = Arc::new(Counters::default());
        let group = WorkerGroup::spawn(
            1,
            rx,
            RetryPolicy::new(3, Duration::ZERO),
            Arc::clone(&counters),
        );

        let (boom, boom_stream, boom_ack) = handoff_task(|| async {
            if true {
                panic!("operation blew up");
            }
            Ok::<(), OperationError>(())
        });
        tx.send(boom).await.unwrap();
        boom_ack.await.unwrap();
        assert!(boom_stream.collect().await.is_empty());

        let (ok, ok_stream, ok_ack) = handoff_task(|| async { Ok::<(), OperationError>(()) });
        tx.send(ok).await.unwrap();
        ok_ack.await.unwrap();
        let results = ok_stream.collect().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_success());

        drop(tx);
        group.join().await;
        let stats = counters.snapshot(crate::queue::Lifecycle::Closed, 1, 0, 0);
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.dispatched, 2);
    }

    #[tokio::test]
    async fn withdrawn_submission_is_skipped() {
        let (tx, rx) = mpsc::channel::<Handoff>(1);
        let counters = Arc::new(Counters::default());

        let (task, stream, ack) = handoff_task(|| async { Ok::<(), OperationError>(()) });
        drop(ack);
        drop(stream);
        tx.send(task).await.unwrap();
        drop(tx);

        let group = WorkerGroup::spawn(
            1,
            rx,
            RetryPolicy::new(1, Duration::ZERO),
            Arc::clone(&counters),
        );
        group.join().await;

        let stats = counters.snapshot(crate::queue::Lifecycle::Closed, 1, 0, 0);
        assert_eq!(stats.dispatched, 0);
        assert_eq!(stats.succeeded, 0);
    }
}
