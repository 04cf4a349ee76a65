use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::queue::{AbandonReason, Lifecycle, TaskOutcome};

/// Point-in-time view of a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub state: Lifecycle,
    pub workers: usize,
    /// Entries currently in the admission ring.
    pub tracked: usize,
    /// `do_task` calls between admission and handoff.
    pub in_flight: usize,
    pub submitted: u64,
    pub dispatched: u64,
    pub evicted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub receiver_dropped: u64,
    pub panicked: u64,
}

/// Lock-free counters shared by the facade and the workers.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    dispatched: AtomicU64,
    evicted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    receiver_dropped: AtomicU64,
    panicked: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    pub(crate) fn submitted(&self) {
        bump(&self.submitted);
    }

    pub(crate) fn dispatched(&self) {
        bump(&self.dispatched);
    }

    pub(crate) fn evicted(&self) {
        bump(&self.evicted);
    }

    pub(crate) fn panicked(&self) {
        bump(&self.panicked);
    }

    pub(crate) fn record(&self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Succeeded { .. } => bump(&self.succeeded),
            TaskOutcome::Failed { .. } => bump(&self.failed),
            TaskOutcome::Abandoned {
                reason: AbandonReason::Cancelled,
                ..
            } => bump(&self.cancelled),
            TaskOutcome::Abandoned {
                reason: AbandonReason::ReceiverDropped,
                ..
            } => bump(&self.receiver_dropped),
        }
    }

    pub(crate) fn snapshot(
        &self,
        state: Lifecycle,
        workers: usize,
        tracked: usize,
        in_flight: usize,
    ) -> QueueStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        QueueStats {
            state,
            workers,
            tracked,
            in_flight,
            submitted: load(&self.submitted),
            dispatched: load(&self.dispatched),
            evicted: load(&self.evicted),
            succeeded: load(&self.succeeded),
            failed: load(&self.failed),
            cancelled: load(&self.cancelled),
            receiver_dropped: load(&self.receiver_dropped),
            panicked: load(&self.panicked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_land_in_their_counter() {
        let counters = Counters::default();
        counters.record(&TaskOutcome::Succeeded { attempts: 1 });
        counters.record(&TaskOutcome::Failed { attempts: 3 });
        counters.record(&TaskOutcome::Abandoned {
            attempt: 2,
            reason: AbandonReason::Cancelled,
        });
        counters.record(&TaskOutcome::Abandoned {
            attempt: 1,
            reason: AbandonReason::ReceiverDropped,
        });
        counters.submitted();
        counters.evicted();

        let stats = counters.snapshot(Lifecycle::Running, 4, 1, 0);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.receiver_dropped, 1);
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.panicked, 0);
    }

    #[test]
    fn stats_serialize_as_json() {
        let stats = Counters::default().snapshot(Lifecycle::Created, 2, 0, 0);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["state"], "Created");
        assert_eq!(json["workers"], 2);
    }
}
