//! Queue lifecycle and task outcomes.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::QueueError;

/// Queue lifecycle.
///
/// State transitions:
/// - Created -> Running (`run`)
/// - Running -> Draining -> Closed (`finish`)
/// - Created -> Draining -> Closed (`finish` without `run`)
///
/// Only `Running` accepts tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Lifecycle {
    Created = 0,
    Running = 1,
    /// `finish` was called; waiting for in-flight handoffs.
    Draining = 2,
    /// Handoff channel closed.
    Closed = 3,
}

impl Lifecycle {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Lifecycle::Created,
            1 => Lifecycle::Running,
            2 => Lifecycle::Draining,
            _ => Lifecycle::Closed,
        }
    }

    pub fn accepts_tasks(self) -> bool {
        matches!(self, Lifecycle::Running)
    }

    pub fn is_finishing(self) -> bool {
        matches!(self, Lifecycle::Draining | Lifecycle::Closed)
    }
}

/// Atomic lifecycle plus a drain barrier counting `do_task` calls that are
/// between admission and handoff.
#[derive(Debug)]
pub(crate) struct LifecycleGuard {
    state: AtomicU8,
    in_flight: AtomicUsize,
    drained: Notify,
}

impl LifecycleGuard {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(Lifecycle::Created as u8),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    pub(crate) fn current(&self) -> Lifecycle {
        Lifecycle::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: Lifecycle, to: Lifecycle) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn start(&self) -> Result<(), QueueError> {
        if self.transition(Lifecycle::Created, Lifecycle::Running) {
            return Ok(());
        }
        match self.current() {
            Lifecycle::Running => Err(QueueError::AlreadyRunning),
            _ => Err(QueueError::Closed),
        }
    }

    /// Register a submission. The returned guard must live until the
    /// handoff completes (or fails).
    pub(crate) fn enter(&self) -> Result<InFlight<'_>, QueueError> {
        // Increment first: a concurrent begin_drain either sees us in the
        // counter or we see its state change.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight { lifecycle: self };
        match self.current() {
            Lifecycle::Running => Ok(guard),
            state @ Lifecycle::Created => Err(QueueError::NotRunning(state)),
            _ => Err(QueueError::Closed),
        }
    }

    fn leave(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Stop accepting tasks. Returns the state we left.
    pub(crate) fn begin_drain(&self) -> Result<Lifecycle, QueueError> {
        for from in [Lifecycle::Running, Lifecycle::Created] {
            if self.transition(from, Lifecycle::Draining) {
                return Ok(from);
            }
        }
        Err(QueueError::Closed)
    }

    pub(crate) async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        self.state.store(Lifecycle::Closed as u8, Ordering::SeqCst);
    }
}

/// RAII registration of one submission in the drain barrier.
#[derive(Debug)]
pub(crate) struct InFlight<'a> {
    lifecycle: &'a LifecycleGuard,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.lifecycle.leave();
    }
}

/// How a task's retry loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// An attempt returned Ok and the terminal result was delivered.
    Succeeded { attempts: u32 },

    /// Every attempt failed and the terminal failure was delivered.
    Failed { attempts: u32 },

    /// The loop stopped early without delivering a terminal result.
    Abandoned { attempt: u32, reason: AbandonReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbandonReason {
    /// The task was evicted by the admission controller.
    Cancelled,

    /// The consumer dropped its `ResultStream`.
    ReceiverDropped,
}
