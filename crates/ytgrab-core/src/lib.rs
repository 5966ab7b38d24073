//! Ytgrab Core Library
//!
//! This crate provides the core functionality for the Ytgrab desktop
//! downloader:
//! - Resolving a source URL into an ordered batch of downloadable items
//! - Bounded-concurrency batch downloading against an extraction engine
//! - Progress aggregation and event reporting for the UI shell

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod fs;
pub mod history;
pub mod item;
pub mod progress;
pub mod task;

pub use config::{DownloadOptions, MAX_PARALLEL_DOWNLOADS, MediaMode, Quality};
pub use coordinator::{BatchHandle, BatchState, PlaylistCoordinator};
pub use engine::rusty::RustyYtdlEngine;
pub use engine::{EngineAdapter, EntryMetadata, ProgressEvent, SourceMetadata};
pub use error::{EngineError, EngineResult, Error, Result};
pub use events::{BatchEvent, BatchSummary};
pub use history::{DownloadHistory, HistoryEntry};
pub use item::{FailureKind, Item, ItemStatus};
pub use progress::{BatchCounters, ProgressAggregator};
pub use task::RetryPolicy;
