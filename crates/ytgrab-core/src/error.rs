//! Error types for ytgrab core operations.

use std::path::PathBuf;

use regex::Regex;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for extraction engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors surfaced to the caller before any download task has started.
///
/// Item-level failures never appear here: every failure inside a running
/// batch is converted into a status outcome by the task that owns the item.
#[derive(Debug, Error)]
pub enum Error {
    /// The source URL is malformed or empty.
    #[error("Invalid source URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL as entered.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The source could not be resolved into downloadable items.
    #[error("Could not resolve '{url}': {reason}")]
    Resolution {
        /// The source URL.
        url: String,
        /// Engine-reported reason, cleaned for display.
        reason: String,
    },

    /// The source resolved but contained no downloadable items.
    #[error("No downloadable items found at '{0}'")]
    EmptySource(String),

    /// The destination directory is missing and could not be created, or is
    /// not writable.
    #[error("Destination '{path}' is not writable: {reason}")]
    DestinationNotWritable {
        /// The destination directory.
        path: PathBuf,
        /// Why it cannot be used.
        reason: String,
    },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by an extraction engine adapter.
///
/// The engine reports failures as free text; adapters classify that text
/// into these variants so the coordinator never has to know engine-specific
/// phrasing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The requested content does not exist (deleted video, bad id).
    #[error("Content not found: {0}")]
    NotFound(String),

    /// The content exists but requires permissions the engine does not have
    /// (private or members-only videos). Never worth retrying.
    #[error("Access restricted: {0}")]
    AccessRestricted(String),

    /// Network or extraction failure not attributable to the content itself.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The transfer was aborted through the progress callback.
    #[error("Download cancelled")]
    Cancelled,
}

/// Strip terminal escape sequences, engine log prefixes and trailing
/// documentation links from engine error text so it can be shown in a status
/// line.
pub(crate) fn clean_error_text(raw: &str) -> String {
    let mut text = raw.to_string();
    if let Ok(ansi) = Regex::new(r"\x1b\[[0-9;]*m") {
        text = ansi.replace_all(&text, "").into_owned();
    }
    if let Ok(links) = Regex::new(r"(?:Also see|See)\s+https?://\S+") {
        text = links.replace_all(&text, "").into_owned();
    }
    text.replace("ERROR:", "").trim().to_string()
}

/// Truncate a reason string to `max_chars` for one-line status display.
pub(crate) fn truncate_reason(reason: &str, max_chars: usize) -> String {
    if reason.chars().count() <= max_chars {
        reason.to_string()
    } else {
        let kept: String = reason.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
