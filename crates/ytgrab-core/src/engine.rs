//! Extraction engine boundary.
//!
//! All protocol-level work (site API parsing, format negotiation, stream
//! retrieval, muxing) is delegated to an extraction engine behind the
//! [`EngineAdapter`] trait. The coordinator only ever talks to this
//! boundary. [`rusty::RustyYtdlEngine`] is the default implementation.

pub mod rusty;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::DownloadOptions;
use crate::error::EngineResult;

/// Metadata for one downloadable entry, as reported by a probe.
///
/// Only the identifying fields matter for downloading; everything else is
/// best-effort display metadata and may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Direct media URL, when the engine resolved one.
    pub url: Option<String>,
    /// Platform video id; a watch URL can be constructed from it.
    pub id: Option<String>,
    /// Public webpage URL for the entry.
    pub webpage_url: Option<String>,
    /// Entry title.
    pub title: Option<String>,
    /// Duration in seconds.
    pub duration_secs: Option<u64>,
    /// Approximate size in bytes.
    pub filesize_approx: Option<u64>,
    /// Channel/uploader name.
    pub channel: Option<String>,
    /// Upload date as reported by the engine (`YYYYMMDD` or `YYYY-MM-DD`).
    pub upload_date: Option<String>,
    /// View count.
    pub view_count: Option<u64>,
}

/// Result of probing a source URL in metadata-only mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Source title: the playlist title, or the single video's title.
    pub title: String,
    /// Entries in source order. A single video probes to one entry.
    pub entries: Vec<EntryMetadata>,
}

/// One progress event emitted by an engine during a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Bytes are flowing.
    Downloading {
        /// Transfer progress, 0.0 - 100.0.
        percent: f64,
        /// Current transfer speed in bytes per second, when known.
        speed_bps: Option<f64>,
        /// Estimated seconds remaining, when known.
        eta_secs: Option<u64>,
    },
    /// The transfer finished; the file is at `filepath`.
    Finished {
        /// Final output path.
        filepath: PathBuf,
    },
    /// The engine hit an error it is about to surface as its return value.
    Errored {
        /// Engine-reported reason.
        reason: String,
    },
}

/// Progress callback handed to [`EngineAdapter::download`].
///
/// Returning `false` instructs the engine to abort the transfer; the engine
/// then fails with [`crate::error::EngineError::Cancelled`].
pub type ProgressCallback = Box<dyn FnMut(ProgressEvent) -> bool + Send>;

/// Extraction engine boundary consumed by the coordinator.
///
/// Implementations are expected to block on network I/O; callers invoke
/// them from blocking contexts (the coordinator uses the runtime's blocking
/// pool), never directly on an async executor thread.
#[cfg_attr(test, mockall::automock)]
pub trait EngineAdapter: Send + Sync {
    /// Probe `url` in metadata-only mode, with no data transfer.
    ///
    /// For a playlist source this returns one entry per playlist member in
    /// source order; for a single video it returns exactly one entry. Item
    /// tasks also use this as an accessibility check before transferring.
    fn probe(&self, url: &str, options: &DownloadOptions) -> EngineResult<SourceMetadata>;

    /// Download the single item at `url` into the destination from
    /// `options`, streaming progress through `on_progress`.
    ///
    /// `on_progress` is invoked zero or more times before the call
    /// terminates. Returns the path of the finished file.
    fn download(
        &self,
        url: &str,
        options: &DownloadOptions,
        on_progress: ProgressCallback,
    ) -> EngineResult<PathBuf>;
}
