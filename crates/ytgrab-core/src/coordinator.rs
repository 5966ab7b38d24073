//! Playlist batch coordination.
//!
//! The [`PlaylistCoordinator`] resolves a source URL into an ordered item
//! list, fans the list out onto a bounded worker pool of single-item
//! download tasks, and monitors the pool until drain or cancellation. All
//! observable state flows through the batch event channel and the
//! [`BatchState`] snapshot accessors on the returned [`BatchHandle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::DownloadOptions;
use crate::engine::EngineAdapter;
use crate::error::{Error, Result, clean_error_text};
use crate::events::{BatchEvent, BatchSummary};
use crate::fs;
use crate::history::DownloadHistory;
use crate::item::{Item, ItemStatus};
use crate::progress::{BatchCounters, ProgressAggregator};
use crate::task::{ItemDownloadTask, RetryPolicy};

/// Interval at which the monitor loop re-checks for drain or cancellation.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Shared state for one running batch.
///
/// Owns the ordered item list, the aggregate counters and the terminal
/// flags. Nothing here is shared across batches: every dispatch builds a
/// fresh value, so stale state from a previous batch can never leak into a
/// new one.
#[derive(Debug)]
pub struct BatchState {
    items: RwLock<Vec<Item>>,
    aggregator: ProgressAggregator,
    events: UnboundedSender<BatchEvent>,
    cancelled: AtomicBool,
    active: AtomicBool,
}

impl BatchState {
    pub(crate) fn new(items: Vec<Item>, events: UnboundedSender<BatchEvent>) -> Self {
        let aggregator = ProgressAggregator::new(items.len(), events.clone());
        Self {
            items: RwLock::new(items),
            aggregator,
            events,
            cancelled: AtomicBool::new(false),
            active: AtomicBool::new(true),
        }
    }

    /// Snapshot of the full item list.
    #[must_use]
    pub fn items(&self) -> Vec<Item> {
        self.read_items().clone()
    }

    /// Snapshot of the per-item statuses, in batch order.
    #[must_use]
    pub fn item_statuses(&self) -> Vec<ItemStatus> {
        self.read_items()
            .iter()
            .map(|item| item.status.clone())
            .collect()
    }

    /// Snapshot of the aggregate counters.
    #[must_use]
    pub fn counters(&self) -> BatchCounters {
        self.aggregator.snapshot()
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the batch is still running (not yet drained).
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn aggregator(&self) -> &ProgressAggregator {
        &self.aggregator
    }

    /// Request cancellation. Idempotent; only the first request is
    /// announced.
    pub(crate) fn request_cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            info!("batch cancellation requested");
            self.emit_status("Cancelling: no new items will be scheduled".to_string());
        }
    }

    /// Update one item's status and report it.
    ///
    /// Statuses are only ever written by the item's own task, so there is
    /// no cross-item contention on the slot itself.
    pub(crate) fn set_status(&self, index: usize, percent: f64, status: ItemStatus) {
        {
            let mut items = self.write_items();
            if let Some(item) = items.get_mut(index) {
                item.status = status.clone();
            } else {
                debug!("status update for unknown item index {index}");
                return;
            }
        }
        let _ = self.events.send(BatchEvent::ItemProgress {
            index,
            percent,
            status,
        });
    }

    pub(crate) fn emit_status(&self, text: String) {
        let _ = self.events.send(BatchEvent::StatusMessage(text));
    }

    pub(crate) fn emit_batch_percent(&self, percent: f64) {
        let _ = self.events.send(BatchEvent::BatchProgress { percent });
    }

    pub(crate) fn emit_completed(&self, summary: BatchSummary) {
        let _ = self.events.send(BatchEvent::BatchCompleted(summary));
    }

    pub(crate) fn mark_finished(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn read_items(&self) -> RwLockReadGuard<'_, Vec<Item>> {
        self.items.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_items(&self) -> RwLockWriteGuard<'_, Vec<Item>> {
        self.items.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a running batch.
///
/// Dropping the handle does not stop the batch; use
/// [`BatchHandle::cancel`] for that.
pub struct BatchHandle {
    state: Arc<BatchState>,
    events: Option<UnboundedReceiver<BatchEvent>>,
    driver: Option<JoinHandle<BatchSummary>>,
}

impl BatchHandle {
    /// Request cancellation of the batch.
    ///
    /// No new items will be scheduled; in-flight transfers either abort at
    /// their next progress event or complete normally.
    pub fn cancel(&self) {
        self.state.request_cancel();
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Whether the batch is still running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Snapshot of the aggregate counters.
    #[must_use]
    pub fn counters(&self) -> BatchCounters {
        self.state.counters()
    }

    /// Snapshot of the full item list.
    #[must_use]
    pub fn items(&self) -> Vec<Item> {
        self.state.items()
    }

    /// Snapshot of per-item statuses, in batch order.
    #[must_use]
    pub fn item_statuses(&self) -> Vec<ItemStatus> {
        self.state.item_statuses()
    }

    /// Take the batch event receiver. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<UnboundedReceiver<BatchEvent>> {
        self.events.take()
    }

    /// Wait for the batch to reach its terminal state.
    ///
    /// Further calls after the first return a summary rebuilt from the
    /// final counters.
    pub async fn wait(&mut self) -> BatchSummary {
        if let Some(driver) = self.driver.take() {
            match driver.await {
                Ok(summary) => summary,
                Err(err) => {
                    error!("batch driver failed: {err}");
                    self.state.counters().to_summary()
                }
            }
        } else {
            self.state.counters().to_summary()
        }
    }
}

/// Coordinates playlist batches against an extraction engine.
pub struct PlaylistCoordinator {
    engine: Arc<dyn EngineAdapter>,
    history: Arc<DownloadHistory>,
    retry: RetryPolicy,
}

impl PlaylistCoordinator {
    /// Create a coordinator over the given engine.
    #[must_use]
    pub fn new(engine: Arc<dyn EngineAdapter>) -> Self {
        Self {
            engine,
            history: Arc::new(DownloadHistory::new()),
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy applied to every item task.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Share an existing download history (one per application).
    #[must_use]
    pub fn with_history(mut self, history: Arc<DownloadHistory>) -> Self {
        self.history = history;
        self
    }

    /// The download history fed by this coordinator's batches.
    #[must_use]
    pub fn history(&self) -> Arc<DownloadHistory> {
        Arc::clone(&self.history)
    }

    /// Resolve `url` into the ordered item list for one batch.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUrl`] for malformed input, [`Error::Resolution`]
    /// when the engine cannot enumerate the source, and
    /// [`Error::EmptySource`] when it yields zero items.
    pub async fn resolve(&self, url: &str, options: &DownloadOptions) -> Result<Vec<Item>> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidUrl {
                url: url.to_string(),
                reason: "URL is empty".to_string(),
            });
        }
        let lower = trimmed.to_lowercase();
        if !lower.starts_with("http://") && !lower.starts_with("https://") {
            return Err(Error::InvalidUrl {
                url: trimmed.to_string(),
                reason: "URL must start with http:// or https://".to_string(),
            });
        }

        info!("resolving source: {trimmed}");
        let engine = Arc::clone(&self.engine);
        let probe_options = options.clone();
        let source = trimmed.to_string();
        let probe_url = source.clone();
        let metadata = tokio::task::spawn_blocking(move || engine.probe(&probe_url, &probe_options))
            .await
            .map_err(|err| Error::Resolution {
                url: source.clone(),
                reason: format!("probe task failed: {err}"),
            })?
            .map_err(|err| Error::Resolution {
                url: source.clone(),
                reason: clean_error_text(&err.to_string()),
            })?;

        if metadata.entries.is_empty() {
            return Err(Error::EmptySource(source));
        }

        let items: Vec<Item> = metadata
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| Item::from_entry(index, entry))
            .collect();
        info!("resolved {} item(s) from '{}'", items.len(), metadata.title);
        Ok(items)
    }

    /// Begin bounded-concurrency dispatch of `items` and return
    /// immediately.
    ///
    /// Progress is observed through the handle's event receiver and
    /// snapshot accessors; the batch runs to drain even if the handle's
    /// events are never consumed.
    ///
    /// # Errors
    ///
    /// [`Error::DestinationNotWritable`] when the destination directory
    /// cannot be created or written. Nothing is scheduled in that case.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(&self, mut items: Vec<Item>, mut options: DownloadOptions) -> Result<BatchHandle> {
        options.validate();
        fs::ensure_writable_dir(&options.destination)?;

        // Indices are positional; re-number in case the caller filtered the
        // resolved list.
        for (index, item) in items.iter_mut().enumerate() {
            item.index = index;
            item.status = ItemStatus::Pending;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = Arc::new(BatchState::new(items, events_tx));
        let driver = tokio::spawn(run_batch(
            Arc::clone(&state),
            Arc::clone(&self.engine),
            Arc::new(options),
            self.retry,
            Arc::clone(&self.history),
        ));

        Ok(BatchHandle {
            state,
            events: Some(events_rx),
            driver: Some(driver),
        })
    }
}

/// Drive one batch: dispatch bounded by a semaphore, then poll for drain.
async fn run_batch(
    state: Arc<BatchState>,
    engine: Arc<dyn EngineAdapter>,
    options: Arc<DownloadOptions>,
    retry: RetryPolicy,
    history: Arc<DownloadHistory>,
) -> BatchSummary {
    let items = state.items();
    let total = items.len();
    let workers = options.max_concurrency.min(total).max(1);
    info!("dispatching batch of {total} item(s) with {workers} worker(s)");
    state.emit_status(format!("Starting parallel download of {total} item(s)..."));

    let semaphore = Arc::new(Semaphore::new(workers));
    let mut submitted = 0usize;
    for item in items {
        if state.is_cancelled() {
            break;
        }
        // Acquiring in list order keeps dispatch bounded and ordered. The
        // semaphore is never closed, so acquisition cannot fail.
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        if state.is_cancelled() {
            break;
        }

        let task = ItemDownloadTask {
            index: item.index,
            source_url: item.source_url.clone(),
            title: item.title.clone(),
            upload_date: item.upload_date.clone(),
            engine: Arc::clone(&engine),
            options: Arc::clone(&options),
            retry,
            state: Arc::clone(&state),
            history: Arc::clone(&history),
        };
        submitted += 1;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            task.execute();
        });
    }

    if submitted < total {
        info!(
            "dispatch stopped after {submitted}/{total} item(s); {} never scheduled",
            total - submitted
        );
    }

    // Every submitted task records exactly one terminal outcome, so the
    // drain condition holds even after cancellation left items unscheduled.
    loop {
        let counters = state.counters();
        if counters.completed >= submitted {
            break;
        }
        debug!(
            "waiting for drain: {}/{submitted} submitted item(s) settled{}",
            counters.completed,
            if state.is_cancelled() { " (cancelled)" } else { "" }
        );
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }

    finish_batch(&state)
}

/// Emit the terminal report and force the progress indicator to 100%.
fn finish_batch(state: &BatchState) -> BatchSummary {
    state.mark_finished();
    let counters = state.counters();
    let summary = counters.to_summary();

    if state.is_cancelled() {
        info!(
            "batch cancelled: {}/{} item(s) reached an outcome",
            counters.completed, counters.total
        );
        state.emit_status(format!(
            "Downloads cancelled ({} of {} item(s) finished)",
            counters.completed, counters.total
        ));
    } else if summary.failed > 0 {
        info!(
            "batch complete: {}/{} successful, {} failed ({:.1}% success rate)",
            summary.successful, summary.total, summary.failed, summary.success_rate
        );
        state.emit_status(format!(
            "Batch complete: {}/{} item(s) downloaded successfully ({:.1}% success rate)",
            summary.successful, summary.total, summary.success_rate
        ));
        state.emit_status(format!("Failed downloads: {} item(s)", summary.failed));
    } else {
        info!("batch complete: all {} item(s) successful", summary.total);
        state.emit_status(format!(
            "Batch complete: all {} item(s) downloaded successfully",
            summary.total
        ));
    }

    state.emit_batch_percent(100.0);
    state.emit_completed(summary.clone());
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EntryMetadata, MockEngineAdapter, SourceMetadata};
    use crate::error::EngineError;

    fn coordinator(engine: MockEngineAdapter) -> PlaylistCoordinator {
        PlaylistCoordinator::new(Arc::new(engine))
    }

    #[tokio::test]
    async fn test_resolve_rejects_empty_url() {
        let result = coordinator(MockEngineAdapter::new())
            .resolve("   ", &DownloadOptions::default())
            .await;
        assert!(matches!(result, Err(Error::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_resolve_rejects_non_http_url() {
        let result = coordinator(MockEngineAdapter::new())
            .resolve("ftp://example.com/list", &DownloadOptions::default())
            .await;
        assert!(matches!(result, Err(Error::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_resolve_maps_entries_in_order() {
        let mut engine = MockEngineAdapter::new();
        engine.expect_probe().times(1).returning(|_, _| {
            Ok(SourceMetadata {
                title: "Mix".to_string(),
                entries: vec![
                    EntryMetadata {
                        id: Some("one".to_string()),
                        title: Some("First".to_string()),
                        ..EntryMetadata::default()
                    },
                    EntryMetadata {
                        id: Some("two".to_string()),
                        title: Some("Second".to_string()),
                        ..EntryMetadata::default()
                    },
                ],
            })
        });

        let items = coordinator(engine)
            .resolve("https://yt/playlist?list=PL1", &DownloadOptions::default())
            .await
            .expect("resolve should succeed");

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].index, 0);
        assert_eq!(items[0].title, "First");
        assert_eq!(
            items[0].source_url.as_deref(),
            Some("https://www.youtube.com/watch?v=one")
        );
        assert_eq!(items[1].index, 1);
        assert_eq!(items[1].title, "Second");
    }

    #[tokio::test]
    async fn test_resolve_empty_source_is_an_error() {
        let mut engine = MockEngineAdapter::new();
        engine.expect_probe().times(1).returning(|_, _| {
            Ok(SourceMetadata {
                title: "Empty".to_string(),
                entries: vec![],
            })
        });

        let result = coordinator(engine)
            .resolve("https://yt/playlist?list=PL1", &DownloadOptions::default())
            .await;
        assert!(matches!(result, Err(Error::EmptySource(_))));
    }

    #[tokio::test]
    async fn test_resolve_engine_error_becomes_resolution_error() {
        let mut engine = MockEngineAdapter::new();
        engine
            .expect_probe()
            .times(1)
            .returning(|_, _| Err(EngineError::Transport("ERROR: no route to host".to_string())));

        let result = coordinator(engine)
            .resolve("https://yt/playlist?list=PL1", &DownloadOptions::default())
            .await;
        match result {
            Err(Error::Resolution { reason, .. }) => {
                assert!(reason.contains("no route to host"));
                assert!(!reason.contains("ERROR:"));
            }
            other => panic!("expected resolution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_rejects_unwritable_destination() {
        let base = tempfile::TempDir::new().expect("temp dir");
        let blocker = base.path().join("blocker");
        std::fs::write(&blocker, "file in the way").expect("write");

        let items = vec![Item::from_entry(0, &EntryMetadata::default())];
        let options = DownloadOptions::default().with_destination(&blocker);
        let result = coordinator(MockEngineAdapter::new()).start(items, options);
        assert!(matches!(result, Err(Error::DestinationNotWritable { .. })));
    }

    #[test]
    fn test_cancel_announcement_is_idempotent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = BatchState::new(vec![], tx);
        state.request_cancel();
        state.request_cancel();

        let mut messages = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, BatchEvent::StatusMessage(_)) {
                messages += 1;
            }
        }
        assert_eq!(messages, 1);
        assert!(state.is_cancelled());
    }

    #[test]
    fn test_set_status_ignores_unknown_index() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = BatchState::new(vec![], tx);
        state.set_status(7, 50.0, ItemStatus::Completed);
        assert!(rx.try_recv().is_err());
    }
}
