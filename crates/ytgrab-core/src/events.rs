//! Events crossing the presentation boundary.
//!
//! Worker tasks only ever enqueue immutable values onto the batch event
//! channel; the presentation layer owns the single receiver and performs all
//! rendering. Nothing in the core renders or blocks on the UI.

use serde::{Deserialize, Serialize};

use crate::item::ItemStatus;

/// Terminal report for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Items in the batch.
    pub total: usize,
    /// Items that downloaded successfully.
    pub successful: usize,
    /// Items that ended in terminal failure.
    pub failed: usize,
    /// `successful / total`, as a percentage. Cancelled items count against
    /// neither side.
    pub success_rate: f64,
}

/// Event types emitted by a running batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BatchEvent {
    /// Human-readable status line for the log panel.
    StatusMessage(String),
    /// A single item's progress or status changed.
    ItemProgress {
        /// Stable item index within the batch.
        index: usize,
        /// Item progress, 0.0 - 100.0.
        percent: f64,
        /// The item's status after the change.
        status: ItemStatus,
    },
    /// Aggregate batch progress changed.
    BatchProgress {
        /// Batch progress, 0.0 - 100.0.
        percent: f64,
    },
    /// The batch reached a terminal state.
    BatchCompleted(BatchSummary),
}
