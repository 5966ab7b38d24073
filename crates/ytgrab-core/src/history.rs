//! In-memory download history.
//!
//! Retained for the process lifetime only; the shell renders the most
//! recent entries next to the download form. Nothing here survives restart.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::MediaMode;

/// Number of entries surfaced in the recent-downloads panel.
pub const RECENT_LIMIT: usize = 5;

/// One finished download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Item title.
    pub title: String,
    /// Output file name.
    pub filename: String,
    /// Full output path.
    pub filepath: PathBuf,
    /// Whether this was a video or audio-only download.
    pub media: MediaMode,
    /// Completion time, Unix epoch milliseconds.
    pub downloaded_at: u64,
}

/// Append-only download history shared across batches.
#[derive(Debug, Default)]
pub struct DownloadHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl DownloadHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished download.
    pub fn record(&self, title: &str, filepath: &Path, media: MediaMode) {
        let filename = filepath
            .file_name()
            .map_or_else(String::new, |name| name.to_string_lossy().to_string());
        self.lock().push(HistoryEntry {
            title: title.to_string(),
            filename,
            filepath: filepath.to_path_buf(),
            media,
            downloaded_at: now_millis(),
        });
    }

    /// The most recent entries, newest first, capped at [`RECENT_LIMIT`].
    #[must_use]
    pub fn recent(&self) -> Vec<HistoryEntry> {
        let entries = self.lock();
        entries.iter().rev().take(RECENT_LIMIT).cloned().collect()
    }

    /// Total number of recorded downloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether anything has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HistoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
