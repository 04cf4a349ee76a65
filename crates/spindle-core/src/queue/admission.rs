//! Admission controller: a fixed-capacity ring of task handles.
//!
//! The ring is not what bounds concurrency (the worker count does that). It
//! only picks an eviction victim: when a task is admitted into a full ring,
//! the oldest entry is cancelled and dropped. Cancellation is cooperative,
//! so an evicted task that is already running keeps running; it only stops
//! reporting results.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::{TaskHandle, TaskId};

#[derive(Debug)]
pub(crate) struct Admission {
    ring: Mutex<VecDeque<TaskHandle>>,
    capacity: usize,
    prune_completed: bool,
}

/// What an admission did to the ring besides appending.
#[derive(Debug, Default)]
pub(crate) struct Admitted {
    pub evicted: Option<TaskHandle>,
    pub pruned: usize,
}

impl Admission {
    pub(crate) fn new(capacity: usize, prune_completed: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            prune_completed,
        }
    }

    fn ring(&self) -> MutexGuard<'_, VecDeque<TaskHandle>> {
        // Entries are plain handles; a panic elsewhere can't leave them torn.
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn admit(&self, handle: TaskHandle) -> Admitted {
        let mut admitted = Admitted::default();
        {
            let mut ring = self.ring();

            if self.prune_completed {
                let before = ring.len();
                ring.retain(|h| !h.is_finished());
                admitted.pruned = before - ring.len();
            }

            if ring.len() >= self.capacity {
                admitted.evicted = ring.pop_front();
            }
            ring.push_back(handle);
            debug_assert!(ring.len() <= self.capacity);
        }

        if let Some(evicted) = &admitted.evicted {
            evicted.cancel();
        }
        admitted
    }

    pub(crate) fn len(&self) -> usize {
        self.ring().len()
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tracked ids, oldest first.
    pub(crate) fn snapshot(&self) -> Vec<TaskId> {
        self.ring().iter().map(|h| h.id()).collect()
    }
}
