//! Batch items and their status lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::EntryMetadata;

/// Sentinel rendered for missing metadata values.
pub const UNKNOWN_VALUE: &str = "--";

/// Why an item ended in a terminal [`ItemStatus::Failed`] state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Private or members-only content; retrying cannot help.
    AccessRestricted,
    /// The resolved entry carried no usable source URL.
    Unresolvable,
    /// Transient-class failure that exhausted its retries, or an internal
    /// defect converted at the task boundary.
    Other,
}

/// Status of a batch item.
///
/// Transitions: Pending → Downloading → {Completed | Failed | Cancelled};
/// an item heading for Failed may pass through Retrying → Downloading up to
/// the retry bound. Completed, Failed and Cancelled are terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting to be scheduled.
    Pending,
    /// Transfer in progress.
    Downloading {
        /// Item transfer progress, 0.0 - 100.0.
        percent: f64,
    },
    /// Waiting out the backoff before another attempt.
    Retrying {
        /// The attempt about to start (1-based).
        attempt: u32,
    },
    /// Downloaded successfully.
    Completed,
    /// Terminal failure.
    Failed {
        /// Cleaned, display-ready reason.
        reason: String,
        /// Failure classification for distinct rendering.
        kind: FailureKind,
    },
    /// Aborted by user cancellation.
    Cancelled,
}

impl ItemStatus {
    /// Check whether the status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed { .. } | Self::Cancelled
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Downloading { percent } => write!(f, "Downloading {percent:.0}%"),
            Self::Retrying { attempt } => write!(f, "Retrying (attempt {attempt})"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed { reason, .. } => write!(f, "Failed: {reason}"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// One downloadable unit of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Stable position in the batch, used for all status reporting.
    pub index: usize,
    /// Download source, resolved from the entry's direct URL, id or webpage
    /// URL in that priority order. `None` when the entry had no usable
    /// source field.
    pub source_url: Option<String>,
    /// Display title.
    pub title: String,
    /// Duration in seconds, when known.
    pub duration_secs: Option<u64>,
    /// Approximate size in bytes, when known.
    pub filesize_approx: Option<u64>,
    /// Channel/uploader name, when known.
    pub channel: Option<String>,
    /// Upload date as reported by the engine, when known.
    pub upload_date: Option<String>,
    /// View count, when known.
    pub view_count: Option<u64>,
    /// Current status; mutated only by the item's own download task.
    pub status: ItemStatus,
}

impl Item {
    /// Build an item from a probed entry.
    #[must_use]
    pub fn from_entry(index: usize, entry: &EntryMetadata) -> Self {
        let source_url = entry
            .url
            .clone()
            .or_else(|| {
                entry
                    .id
                    .as_ref()
                    .map(|id| format!("https://www.youtube.com/watch?v={id}"))
            })
            .or_else(|| entry.webpage_url.clone());

        Self {
            index,
            source_url,
            title: entry
                .title
                .clone()
                .unwrap_or_else(|| format!("Video {}", index + 1)),
            duration_secs: entry.duration_secs,
            filesize_approx: entry.filesize_approx,
            channel: entry.channel.clone(),
            upload_date: entry.upload_date.clone(),
            view_count: entry.view_count,
            status: ItemStatus::Pending,
        }
    }

    /// Duration formatted as `m:ss` / `h:mm:ss`.
    #[must_use]
    pub fn display_duration(&self) -> String {
        self.duration_secs
            .map_or_else(|| UNKNOWN_VALUE.to_string(), format_duration)
    }

    /// Approximate size as a human-readable byte count.
    #[must_use]
    pub fn display_size(&self) -> String {
        self.filesize_approx
            .map_or_else(|| UNKNOWN_VALUE.to_string(), format_size)
    }

    /// Channel name, or the unknown sentinel.
    #[must_use]
    pub fn display_channel(&self) -> String {
        self.channel
            .clone()
            .unwrap_or_else(|| UNKNOWN_VALUE.to_string())
    }

    /// Upload date normalized to `YYYY-MM-DD` where possible.
    #[must_use]
    pub fn display_upload_date(&self) -> String {
        self.upload_date
            .as_deref()
            .map_or_else(|| UNKNOWN_VALUE.to_string(), format_upload_date)
    }

    /// View count humanized (`1.2M views`, `3.4K views`).
    #[must_use]
    pub fn display_views(&self) -> String {
        self.view_count
            .map_or_else(|| UNKNOWN_VALUE.to_string(), format_views)
    }
}

/// Format a duration in seconds as `m:ss` or `h:mm:ss`.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Format a byte count as a human-readable string.
fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{bytes:.0} B")
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.1} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.1} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Normalize `YYYYMMDD` dates to `YYYY-MM-DD`; anything else passes through.
fn format_upload_date(date: &str) -> String {
    if date.len() == 8 && date.chars().all(|c| c.is_ascii_digit()) {
        format!("{}-{}-{}", &date[0..4], &date[4..6], &date[6..8])
    } else {
        date.to_string()
    }
}

/// Humanize a view count.
fn format_views(views: u64) -> String {
    if views > 1_000_000 {
        format!("{:.1}M views", views as f64 / 1_000_000.0)
    } else if views > 1_000 {
        format!("{:.1}K views", views as f64 / 1_000.0)
    } else {
        format!("{views} views")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: Option<&str>, id: Option<&str>, webpage: Option<&str>) -> EntryMetadata {
        EntryMetadata {
            url: url.map(String::from),
            id: id.map(String::from),
            webpage_url: webpage.map(String::from),
            ..EntryMetadata::default()
        }
    }

    #[test]
    fn test_source_url_priority() {
        let direct = Item::from_entry(0, &entry(Some("https://cdn/x"), Some("abc"), None));
        assert_eq!(direct.source_url.as_deref(), Some("https://cdn/x"));

        let from_id = Item::from_entry(0, &entry(None, Some("abc"), Some("https://yt/w")));
        assert_eq!(
            from_id.source_url.as_deref(),
            Some("https://www.youtube.com/watch?v=abc")
        );

        let from_webpage = Item::from_entry(0, &entry(None, None, Some("https://yt/w")));
        assert_eq!(from_webpage.source_url.as_deref(), Some("https://yt/w"));

        let unresolvable = Item::from_entry(0, &entry(None, None, None));
        assert!(unresolvable.source_url.is_none());
    }

    #[test]
    fn test_title_fallback_is_one_based() {
        let item = Item::from_entry(2, &entry(None, Some("abc"), None));
        assert_eq!(item.title, "Video 3");
    }

    #[test]
    fn test_new_items_are_pending() {
        let item = Item::from_entry(0, &entry(None, Some("abc"), None));
        assert_eq!(item.status, ItemStatus::Pending);
        assert!(!item.status.is_terminal());
    }

    #[test]
    fn test_status_terminality() {
        assert!(ItemStatus::Completed.is_terminal());
        assert!(ItemStatus::Cancelled.is_terminal());
        assert!(
            ItemStatus::Failed {
                reason: "x".to_string(),
                kind: FailureKind::Other
            }
            .is_terminal()
        );
        assert!(!ItemStatus::Downloading { percent: 50.0 }.is_terminal());
        assert!(!ItemStatus::Retrying { attempt: 2 }.is_terminal());
    }

    #[test]
    fn test_display_duration() {
        let mut item = Item::from_entry(0, &entry(None, Some("abc"), None));
        assert_eq!(item.display_duration(), UNKNOWN_VALUE);
        item.duration_secs = Some(225);
        assert_eq!(item.display_duration(), "3:45");
        item.duration_secs = Some(5025);
        assert_eq!(item.display_duration(), "1:23:45");
    }

    #[test]
    fn test_display_upload_date() {
        let mut item = Item::from_entry(0, &entry(None, Some("abc"), None));
        assert_eq!(item.display_upload_date(), UNKNOWN_VALUE);
        item.upload_date = Some("20240115".to_string());
        assert_eq!(item.display_upload_date(), "2024-01-15");
        item.upload_date = Some("2024-01-15".to_string());
        assert_eq!(item.display_upload_date(), "2024-01-15");
    }

    #[test]
    fn test_display_views() {
        let mut item = Item::from_entry(0, &entry(None, Some("abc"), None));
        assert_eq!(item.display_views(), UNKNOWN_VALUE);
        item.view_count = Some(420);
        assert_eq!(item.display_views(), "420 views");
        item.view_count = Some(3_400);
        assert_eq!(item.display_views(), "3.4K views");
        item.view_count = Some(1_200_000);
        assert_eq!(item.display_views(), "1.2M views");
    }

    #[test]
    fn test_display_size() {
        let mut item = Item::from_entry(0, &entry(None, Some("abc"), None));
        item.filesize_approx = Some(512);
        assert_eq!(item.display_size(), "512 B");
        item.filesize_approx = Some(52_428_800);
        assert_eq!(item.display_size(), "50.0 MB");
    }

    #[test]
    fn test_status_serialization_is_tagged() {
        let status = ItemStatus::Failed {
            reason: "Private video".to_string(),
            kind: FailureKind::AccessRestricted,
        };
        let json = serde_json::to_value(&status).expect("serialize");
        assert_eq!(json["state"], "failed");
        assert_eq!(json["kind"], "access_restricted");
    }
}
