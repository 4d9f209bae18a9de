//! Work deferred because its parent commit failed.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;
use vigil_core::WorkItem;

#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub item: WorkItem,
    pub enqueued: Instant,
}

/// In-memory list of deferred work items. Entries older than the TTL are
/// dropped on replay, never executed.
#[derive(Debug)]
pub struct RetryTracker {
    entries: Mutex<Vec<RetryEntry>>,
    ttl: Duration,
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new(vigil_config::default_retry_ttl())
    }
}

impl RetryTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            ttl,
        }
    }

    pub fn add(&self, item: WorkItem) {
        self.entries
            .lock()
            .expect("retry list poisoned")
            .push(RetryEntry {
                item,
                enqueued: Instant::now(),
            });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("retry list poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes every entry and hands each unexpired one to `rerun` with the
    /// parent check disabled. Entries added meanwhile wait for the next replay.
    /// Returns the number of items re-run.
    pub fn replay(&self, mut rerun: impl FnMut(WorkItem)) -> usize {
        let snapshot = std::mem::take(&mut *self.entries.lock().expect("retry list poisoned"));

        let mut replayed = 0;
        for entry in snapshot {
            let age = entry.enqueued.elapsed();
            if age > self.ttl {
                debug!(
                    "dropping deferred run of {} after {:?}",
                    entry.item.solution, age
                );
                continue;
            }
            rerun(entry.item.for_replay());
            replayed += 1;
        }
        replayed
    }
}
