//! Thread-safe aggregate progress counters for one batch.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::events::{BatchEvent, BatchSummary};

/// Snapshot of a batch's aggregate counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounters {
    /// Items in the batch.
    pub total: usize,
    /// Items that reached any terminal outcome (success, failure or
    /// cancellation). Never exceeds `total`.
    pub completed: usize,
    /// Items that ended in terminal failure.
    pub failed: usize,
    /// Items whose in-flight transfer was aborted by cancellation.
    pub cancelled: usize,
}

impl BatchCounters {
    /// Items that downloaded successfully.
    #[must_use]
    pub const fn successful(&self) -> usize {
        self.completed - self.failed - self.cancelled
    }

    /// Aggregate progress, `completed / total` as a percentage.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }

    /// Build the terminal summary for these counters.
    #[must_use]
    pub fn to_summary(&self) -> BatchSummary {
        let successful = self.successful();
        let success_rate = if self.total == 0 {
            0.0
        } else {
            (successful as f64 / self.total as f64) * 100.0
        };
        BatchSummary {
            total: self.total,
            successful,
            failed: self.failed,
            success_rate,
        }
    }
}

/// Increment-only outcome counters shared by all item tasks of a batch.
///
/// Every counter update and the percent derived from it are published onto
/// the event channel while the lock is still held, so the `BatchProgress`
/// sequence observed by the presentation layer can never regress.
#[derive(Debug)]
pub struct ProgressAggregator {
    inner: Mutex<BatchCounters>,
    events: UnboundedSender<BatchEvent>,
}

impl ProgressAggregator {
    /// Create an aggregator for a batch of `total` items.
    pub fn new(total: usize, events: UnboundedSender<BatchEvent>) -> Self {
        Self {
            inner: Mutex::new(BatchCounters {
                total,
                ..BatchCounters::default()
            }),
            events,
        }
    }

    /// Record one item's terminal outcome.
    pub fn record_outcome(&self, success: bool) {
        let mut counters = self.lock();
        counters.completed += 1;
        if !success {
            counters.failed += 1;
        }
        self.publish_locked(&counters);
    }

    /// Record one item's cancellation: neither success nor failure, but the
    /// item is done, so drain detection still advances.
    pub fn record_cancelled(&self) {
        let mut counters = self.lock();
        counters.completed += 1;
        counters.cancelled += 1;
        self.publish_locked(&counters);
    }

    /// Current counter snapshot.
    #[must_use]
    pub fn snapshot(&self) -> BatchCounters {
        *self.lock()
    }

    /// Current aggregate percentage.
    #[must_use]
    pub fn current_percent(&self) -> f64 {
        self.lock().percent()
    }

    fn publish_locked(&self, counters: &BatchCounters) {
        debug_assert!(counters.completed <= counters.total);
        debug!(
            "progress: {}/{} completed, {} failed, {} cancelled",
            counters.completed, counters.total, counters.failed, counters.cancelled
        );
        let _ = self.events.send(BatchEvent::BatchProgress {
            percent: counters.percent(),
        });
    }

    fn lock(&self) -> MutexGuard<'_, BatchCounters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
