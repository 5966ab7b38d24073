//! Single-item download task.
//!
//! One task owns exactly one item of a batch: it probes for accessibility,
//! runs the transfer with bounded retries, classifies failures, and records
//! exactly one terminal outcome with the progress aggregator. Nothing a
//! task does can escape it: every failure path, including panics, is
//! converted into a status outcome.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::DownloadOptions;
use crate::coordinator::BatchState;
use crate::engine::{EngineAdapter, ProgressCallback, ProgressEvent};
use crate::error::{EngineError, clean_error_text, truncate_reason};
use crate::fs;
use crate::history::DownloadHistory;
use crate::item::{FailureKind, ItemStatus};

/// Character cap for failure reasons shown in a per-item status line.
const MAX_REASON_CHARS: usize = 50;

/// Retry policy for item downloads.
///
/// The backoff is flat: the failure mode being covered is the short-lived
/// network hiccup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per item, including the first.
    pub max_attempts: u32,
    /// Wait between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Terminal result of one task.
enum TaskOutcome {
    Completed(PathBuf),
    Failed { reason: String, kind: FailureKind },
    Cancelled,
}

/// Download task for a single batch item.
pub(crate) struct ItemDownloadTask {
    pub(crate) index: usize,
    pub(crate) source_url: Option<String>,
    pub(crate) title: String,
    pub(crate) upload_date: Option<String>,
    pub(crate) engine: Arc<dyn EngineAdapter>,
    pub(crate) options: Arc<DownloadOptions>,
    pub(crate) retry: RetryPolicy,
    pub(crate) state: Arc<BatchState>,
    pub(crate) history: Arc<DownloadHistory>,
}

impl ItemDownloadTask {
    /// Run the task to a terminal outcome and record it exactly once.
    ///
    /// Returns whether the item downloaded successfully. Never panics out
    /// of the hosting worker: a defect inside the attempt loop is converted
    /// into a generic Failed outcome so drain detection always advances.
    pub(crate) fn execute(&self) -> bool {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.run_attempts())).unwrap_or_else(|_| {
            error!(
                "task for item {} panicked, converting to failed outcome",
                self.index + 1
            );
            TaskOutcome::Failed {
                reason: "internal task failure".to_string(),
                kind: FailureKind::Other,
            }
        });
        self.record(outcome)
    }

    fn run_attempts(&self) -> TaskOutcome {
        let Some(url) = self.source_url.as_deref() else {
            warn!("item {} has no resolvable source URL", self.index + 1);
            return TaskOutcome::Failed {
                reason: "no resolvable source URL".to_string(),
                kind: FailureKind::Unresolvable,
            };
        };

        let mut last_reason = "download failed".to_string();
        for attempt in 1..=self.retry.max_attempts {
            if self.state.is_cancelled() {
                return TaskOutcome::Cancelled;
            }
            if attempt > 1 {
                info!(
                    "retrying item {} (attempt {}/{}) in {:?}",
                    self.index + 1,
                    attempt,
                    self.retry.max_attempts,
                    self.retry.backoff
                );
                self.state
                    .set_status(self.index, 0.0, ItemStatus::Retrying { attempt });
                std::thread::sleep(self.retry.backoff);
                if self.state.is_cancelled() {
                    return TaskOutcome::Cancelled;
                }
            }

            self.state
                .set_status(self.index, 0.0, ItemStatus::Downloading { percent: 0.0 });

            // Probe first: no point transferring bytes for content the
            // engine cannot access, and restricted content must not burn
            // retry attempts.
            match self.engine.probe(url, &self.options) {
                Ok(_) => {}
                Err(EngineError::AccessRestricted(reason)) => {
                    return TaskOutcome::Failed {
                        reason: clean_error_text(&reason),
                        kind: FailureKind::AccessRestricted,
                    };
                }
                Err(EngineError::Cancelled) => return TaskOutcome::Cancelled,
                Err(err) => {
                    last_reason = clean_error_text(&err.to_string());
                    warn!(
                        "probe failed for item {} (attempt {}/{}): {last_reason}",
                        self.index + 1,
                        attempt,
                        self.retry.max_attempts
                    );
                    continue;
                }
            }

            match self
                .engine
                .download(url, &self.options, self.progress_callback())
            {
                Ok(path) => {
                    self.history.record(&self.title, &path, self.options.mode);
                    if let Some(date) = self.upload_date.as_deref()
                        && let Err(err) = fs::apply_upload_timestamp(&path, date)
                    {
                        warn!(
                            "could not set upload-date timestamp on {}: {err}",
                            path.display()
                        );
                    }
                    return TaskOutcome::Completed(path);
                }
                Err(EngineError::Cancelled) => return TaskOutcome::Cancelled,
                Err(EngineError::AccessRestricted(reason)) => {
                    return TaskOutcome::Failed {
                        reason: clean_error_text(&reason),
                        kind: FailureKind::AccessRestricted,
                    };
                }
                Err(err) => {
                    last_reason = clean_error_text(&err.to_string());
                    warn!(
                        "download failed for item {} (attempt {}/{}): {last_reason}",
                        self.index + 1,
                        attempt,
                        self.retry.max_attempts
                    );
                }
            }
        }

        error!(
            "item {} failed after {} attempts: {last_reason}",
            self.index + 1,
            self.retry.max_attempts
        );
        TaskOutcome::Failed {
            reason: last_reason,
            kind: FailureKind::Other,
        }
    }

    /// Build the engine progress callback for one attempt.
    ///
    /// The callback checks the batch cancellation flag before forwarding
    /// anything; returning `false` makes the engine abort the transfer.
    fn progress_callback(&self) -> ProgressCallback {
        let state = Arc::clone(&self.state);
        let index = self.index;
        Box::new(move |event| {
            if state.is_cancelled() {
                return false;
            }
            if let ProgressEvent::Downloading { percent, .. } = event {
                state.set_status(index, percent, ItemStatus::Downloading { percent });
            }
            true
        })
    }

    /// The single point where a terminal outcome becomes counter and status
    /// updates.
    fn record(&self, outcome: TaskOutcome) -> bool {
        match outcome {
            TaskOutcome::Completed(path) => {
                info!("item {} downloaded to {}", self.index + 1, path.display());
                self.state
                    .set_status(self.index, 100.0, ItemStatus::Completed);
                self.state.aggregator().record_outcome(true);
                true
            }
            TaskOutcome::Failed { reason, kind } => {
                let reason = truncate_reason(&reason, MAX_REASON_CHARS);
                self.state
                    .set_status(self.index, 0.0, ItemStatus::Failed { reason, kind });
                self.state.aggregator().record_outcome(false);
                false
            }
            TaskOutcome::Cancelled => {
                info!("item {} cancelled", self.index + 1);
                self.state.set_status(self.index, 0.0, ItemStatus::Cancelled);
                self.state.aggregator().record_cancelled();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::engine::{EntryMetadata, MockEngineAdapter, SourceMetadata};
    use crate::events::BatchEvent;
    use crate::item::Item;

    fn test_state(count: usize) -> (Arc<BatchState>, UnboundedReceiver<BatchEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let items = (0..count)
            .map(|i| {
                Item::from_entry(
                    i,
                    &EntryMetadata {
                        id: Some(format!("video{i}")),
                        ..EntryMetadata::default()
                    },
                )
            })
            .collect();
        (Arc::new(BatchState::new(items, tx)), rx)
    }

    fn test_task(
        engine: MockEngineAdapter,
        state: &Arc<BatchState>,
        source_url: Option<&str>,
    ) -> ItemDownloadTask {
        ItemDownloadTask {
            index: 0,
            source_url: source_url.map(String::from),
            title: "Test Video".to_string(),
            upload_date: None,
            engine: Arc::new(engine),
            options: Arc::new(DownloadOptions::default()),
            retry: RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            },
            state: Arc::clone(state),
            history: Arc::new(DownloadHistory::new()),
        }
    }

    fn probe_ok() -> crate::error::EngineResult<SourceMetadata> {
        Ok(SourceMetadata {
            title: "Test Video".to_string(),
            entries: vec![EntryMetadata::default()],
        })
    }

    #[test]
    fn test_success_records_one_outcome() {
        let (state, _rx) = test_state(1);
        let mut engine = MockEngineAdapter::new();
        engine.expect_probe().times(1).returning(|_, _| probe_ok());
        engine
            .expect_download()
            .times(1)
            .returning(|_, _, _| Ok(PathBuf::from("/tmp/out.mp4")));

        let task = test_task(engine, &state, Some("https://yt/watch?v=a"));
        assert!(task.execute());

        let counters = state.counters();
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.failed, 0);
        assert_eq!(state.item_statuses()[0], ItemStatus::Completed);
        assert_eq!(task.history.len(), 1);
    }

    #[test]
    fn test_access_restricted_probes_exactly_once() {
        let (state, _rx) = test_state(1);
        let mut engine = MockEngineAdapter::new();
        engine
            .expect_probe()
            .times(1)
            .returning(|_, _| Err(EngineError::AccessRestricted("Private video".to_string())));
        engine.expect_download().times(0);

        let task = test_task(engine, &state, Some("https://yt/watch?v=a"));
        assert!(!task.execute());

        let counters = state.counters();
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.failed, 1);
        assert!(matches!(
            &state.item_statuses()[0],
            ItemStatus::Failed {
                kind: FailureKind::AccessRestricted,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_source_url_fails_without_engine_calls() {
        let (state, _rx) = test_state(1);
        let mut engine = MockEngineAdapter::new();
        engine.expect_probe().times(0);
        engine.expect_download().times(0);

        let task = test_task(engine, &state, None);
        assert!(!task.execute());

        assert!(matches!(
            &state.item_statuses()[0],
            ItemStatus::Failed {
                kind: FailureKind::Unresolvable,
                ..
            }
        ));
        assert_eq!(state.counters().failed, 1);
    }

    #[test]
    fn test_transient_then_success_completes_without_failure() {
        let (state, _rx) = test_state(1);
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_in_mock = Arc::clone(&attempts);

        let mut engine = MockEngineAdapter::new();
        engine.expect_probe().times(3).returning(|_, _| probe_ok());
        engine.expect_download().times(3).returning(move |_, _, _| {
            if attempts_in_mock.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(EngineError::Transport("connection reset".to_string()))
            } else {
                Ok(PathBuf::from("/tmp/out.mp4"))
            }
        });

        let task = test_task(engine, &state, Some("https://yt/watch?v=a"));
        assert!(task.execute());

        let counters = state.counters();
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.failed, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(state.item_statuses()[0], ItemStatus::Completed);
    }

    #[test]
    fn test_retries_exhausted_becomes_terminal_failed() {
        let (state, mut rx) = test_state(1);
        let mut engine = MockEngineAdapter::new();
        engine.expect_probe().times(3).returning(|_, _| probe_ok());
        engine
            .expect_download()
            .times(3)
            .returning(|_, _, _| Err(EngineError::Transport("timed out".to_string())));

        let task = test_task(engine, &state, Some("https://yt/watch?v=a"));
        assert!(!task.execute());

        let counters = state.counters();
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.failed, 1);
        assert!(matches!(
            &state.item_statuses()[0],
            ItemStatus::Failed {
                kind: FailureKind::Other,
                ..
            }
        ));

        // Both retry transitions were reported.
        let mut retry_attempts = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let BatchEvent::ItemProgress {
                status: ItemStatus::Retrying { attempt },
                ..
            } = event
            {
                retry_attempts.push(attempt);
            }
        }
        assert_eq!(retry_attempts, vec![2, 3]);
    }

    #[test]
    fn test_pre_cancelled_batch_yields_cancelled_outcome() {
        let (state, _rx) = test_state(1);
        state.request_cancel();

        let mut engine = MockEngineAdapter::new();
        engine.expect_probe().times(0);
        engine.expect_download().times(0);

        let task = test_task(engine, &state, Some("https://yt/watch?v=a"));
        assert!(!task.execute());

        let counters = state.counters();
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.cancelled, 1);
        assert_eq!(counters.failed, 0);
        assert_eq!(state.item_statuses()[0], ItemStatus::Cancelled);
    }

    #[test]
    fn test_panicking_engine_becomes_failed_outcome() {
        let (state, _rx) = test_state(1);
        let mut engine = MockEngineAdapter::new();
        engine.expect_probe().returning(|_, _| panic!("engine defect"));

        let task = test_task(engine, &state, Some("https://yt/watch?v=a"));
        assert!(!task.execute());

        // The defect is contained: the outcome is still recorded, so drain
        // detection cannot stall.
        let counters = state.counters();
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.failed, 1);
        assert!(matches!(
            &state.item_statuses()[0],
            ItemStatus::Failed {
                kind: FailureKind::Other,
                ..
            }
        ));
    }

    #[test]
    fn test_engine_cancel_during_download() {
        let (state, _rx) = test_state(1);
        let mut engine = MockEngineAdapter::new();
        engine.expect_probe().times(1).returning(|_, _| probe_ok());
        engine
            .expect_download()
            .times(1)
            .returning(|_, _, _| Err(EngineError::Cancelled));

        let task = test_task(engine, &state, Some("https://yt/watch?v=a"));
        assert!(!task.execute());

        let counters = state.counters();
        assert_eq!(counters.cancelled, 1);
        assert_eq!(counters.completed, 1);
    }

    #[test]
    fn test_callback_aborts_after_cancellation() {
        let (state, _rx) = test_state(1);
        let state_in_mock = Arc::clone(&state);

        let mut engine = MockEngineAdapter::new();
        engine.expect_probe().times(1).returning(|_, _| probe_ok());
        engine
            .expect_download()
            .times(1)
            .returning(move |_, _, mut on_progress| {
                let event = ProgressEvent::Downloading {
                    percent: 10.0,
                    speed_bps: None,
                    eta_secs: None,
                };
                assert!(on_progress(event.clone()));
                state_in_mock.request_cancel();
                assert!(!on_progress(event));
                Err(EngineError::Cancelled)
            });

        let task = test_task(engine, &state, Some("https://yt/watch?v=a"));
        assert!(!task.execute());
        assert_eq!(state.counters().cancelled, 1);
    }
}
