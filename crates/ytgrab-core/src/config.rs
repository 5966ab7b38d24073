//! Batch download options.
//!
//! [`DownloadOptions`] is the immutable configuration snapshot for one
//! batch. It is captured once when a batch is dispatched and every item task
//! receives a copy, so changing selections in the UI mid-batch can never
//! race an active download.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Maximum number of parallel item downloads per batch.
///
/// Bounded to avoid upstream rate limiting from aggressive parallel fetches
/// against a single host.
pub const MAX_PARALLEL_DOWNLOADS: usize = 3;

/// Minimum allowed parallel item downloads.
pub const MIN_PARALLEL_DOWNLOADS: usize = 1;

/// Target video quality for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Quality {
    /// 360p.
    #[serde(rename = "360p")]
    Low360,
    /// 720p (default).
    #[default]
    #[serde(rename = "720p")]
    Medium720,
    /// 1080p.
    #[serde(rename = "1080p")]
    High1080,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low360 => write!(f, "360p"),
            Self::Medium720 => write!(f, "720p"),
            Self::High1080 => write!(f, "1080p"),
        }
    }
}

/// Whether a batch downloads full video or audio only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaMode {
    /// Combined video and audio (default).
    #[default]
    VideoAudio,
    /// Audio-only extraction.
    AudioOnly,
}

impl fmt::Display for MediaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VideoAudio => write!(f, "video"),
            Self::AudioOnly => write!(f, "audio"),
        }
    }
}

/// Immutable configuration snapshot for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Target video quality.
    #[serde(default)]
    pub quality: Quality,
    /// Video or audio-only mode.
    #[serde(default)]
    pub mode: MediaMode,
    /// Whether to ask the engine for subtitles.
    #[serde(default)]
    pub include_subtitles: bool,
    /// Destination directory for downloaded files.
    #[serde(default = "default_destination")]
    pub destination: PathBuf,
    /// Upper bound on parallel item downloads for this batch.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_destination() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

const fn default_max_concurrency() -> usize {
    MAX_PARALLEL_DOWNLOADS
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            mode: MediaMode::default(),
            include_subtitles: false,
            destination: default_destination(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl DownloadOptions {
    /// Clamp the concurrency limit into the supported range.
    pub fn validate(&mut self) {
        self.max_concurrency = self
            .max_concurrency
            .clamp(MIN_PARALLEL_DOWNLOADS, MAX_PARALLEL_DOWNLOADS);
    }

    /// Set the target quality.
    #[must_use]
    pub const fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Set the media mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: MediaMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set whether subtitles should be requested.
    #[must_use]
    pub const fn with_subtitles(mut self, include: bool) -> Self {
        self.include_subtitles = include;
        self
    }

    /// Set the destination directory.
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = destination.into();
        self
    }

    /// Set the concurrency limit (clamped by [`DownloadOptions::validate`]).
    #[must_use]
    pub const fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = DownloadOptions::default();
        assert_eq!(options.quality, Quality::Medium720);
        assert_eq!(options.mode, MediaMode::VideoAudio);
        assert!(!options.include_subtitles);
        assert_eq!(options.max_concurrency, MAX_PARALLEL_DOWNLOADS);
    }

    #[test]
    fn test_validate_clamps_concurrency() {
        let mut options = DownloadOptions::default().with_max_concurrency(0);
        options.validate();
        assert_eq!(options.max_concurrency, MIN_PARALLEL_DOWNLOADS);

        let mut options = DownloadOptions::default().with_max_concurrency(64);
        options.validate();
        assert_eq!(options.max_concurrency, MAX_PARALLEL_DOWNLOADS);
    }

    #[test]
    fn test_builder_methods() {
        let options = DownloadOptions::default()
            .with_quality(Quality::High1080)
            .with_mode(MediaMode::AudioOnly)
            .with_subtitles(true)
            .with_destination("/tmp/media");

        assert_eq!(options.quality, Quality::High1080);
        assert_eq!(options.mode, MediaMode::AudioOnly);
        assert!(options.include_subtitles);
        assert_eq!(options.destination, PathBuf::from("/tmp/media"));
    }

    #[test]
    fn test_serde_defaults() {
        let options: DownloadOptions =
            serde_json::from_str("{}").expect("empty object should deserialize");
        assert_eq!(options, DownloadOptions::default());
    }

    #[test]
    fn test_quality_serde_names() {
        let json = serde_json::to_string(&Quality::High1080).expect("serialize");
        assert_eq!(json, "\"1080p\"");
        let parsed: Quality = serde_json::from_str("\"360p\"").expect("deserialize");
        assert_eq!(parsed, Quality::Low360);
    }
}
