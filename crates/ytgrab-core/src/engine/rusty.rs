//! Default extraction engine adapter backed by `rusty_ytdl`.
//!
//! Pure Rust engine, no external tools required:
//! - single-video metadata through `Video::get_info`
//! - playlist listings by scraping the playlist page (the embedded
//!   `ytInitialData` JSON, with a regex fallback)
//! - downloads through the chunked stream API, reporting percent progress
//!   and honoring abort requests from the progress callback

use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use regex::Regex;
use rusty_ytdl::{Video, VideoOptions, VideoQuality, VideoSearchOptions};
use tracing::{debug, info, warn};

use crate::config::{DownloadOptions, MediaMode, Quality};
use crate::engine::{EngineAdapter, EntryMetadata, ProgressCallback, ProgressEvent, SourceMetadata};
use crate::error::{EngineError, EngineResult, clean_error_text};

/// Extraction engine backed by the `rusty_ytdl` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustyYtdlEngine;

impl RustyYtdlEngine {
    /// Create a new engine instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl EngineAdapter for RustyYtdlEngine {
    fn probe(&self, url: &str, _options: &DownloadOptions) -> EngineResult<SourceMetadata> {
        if is_playlist_url(url) {
            probe_playlist(url)
        } else {
            probe_video(url)
        }
    }

    fn download(
        &self,
        url: &str,
        options: &DownloadOptions,
        mut on_progress: ProgressCallback,
    ) -> EngineResult<PathBuf> {
        if options.include_subtitles {
            debug!("subtitle download is not supported by this engine; ignoring");
        }

        let video_options = video_options_for(options);
        let destination = options.destination.clone();
        let extension = extension_for(options.mode);
        let url = url.to_string();

        block_on_engine(async move {
            let video =
                Video::new_with_options(url.as_str(), video_options).map_err(map_engine_error)?;
            let details = video.get_info().await.map_err(map_engine_error)?.video_details;

            let output_path =
                destination.join(format!("{}.{extension}", sanitize_filename(&details.title)));
            let stream = video.stream().await.map_err(map_engine_error)?;
            let total_bytes = stream.content_length() as u64;
            debug!(
                "streaming '{}' ({} bytes) to {}",
                details.title,
                total_bytes,
                output_path.display()
            );

            let mut file = std::fs::File::create(&output_path).map_err(|e| {
                EngineError::Transport(format!(
                    "failed to create {}: {e}",
                    output_path.display()
                ))
            })?;

            let started = Instant::now();
            let mut written = 0u64;
            while let Some(chunk) = stream.chunk().await.map_err(map_engine_error)? {
                file.write_all(&chunk).map_err(|e| {
                    EngineError::Transport(format!(
                        "failed to write {}: {e}",
                        output_path.display()
                    ))
                })?;
                written += chunk.len() as u64;

                let percent = if total_bytes > 0 {
                    (written as f64 / total_bytes as f64) * 100.0
                } else {
                    0.0
                };
                let elapsed = started.elapsed().as_secs_f64();
                let speed_bps = if elapsed > 0.0 {
                    Some(written as f64 / elapsed)
                } else {
                    None
                };
                let eta_secs = speed_bps
                    .filter(|speed| *speed > 0.0 && total_bytes > written)
                    .map(|speed| ((total_bytes - written) as f64 / speed) as u64);

                if !on_progress(ProgressEvent::Downloading {
                    percent,
                    speed_bps,
                    eta_secs,
                }) {
                    info!("transfer aborted by caller: {}", output_path.display());
                    drop(file);
                    let _ = std::fs::remove_file(&output_path);
                    return Err(EngineError::Cancelled);
                }
            }

            info!("downloaded {written} bytes to {}", output_path.display());
            let _ = on_progress(ProgressEvent::Finished {
                filepath: output_path.clone(),
            });
            Ok(output_path)
        })
    }
}

/// Run an engine future from the blocking context the adapter is called on.
///
/// A throwaway current-thread runtime per call keeps the adapter usable from
/// any blocking thread (the coordinator's blocking pool included) without
/// touching the caller's runtime.
fn block_on_engine<T, F>(future: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| EngineError::Transport(format!("failed to start engine runtime: {e}")))?;
    runtime.block_on(future)
}

fn probe_video(url: &str) -> EngineResult<SourceMetadata> {
    debug!("probing video metadata: {url}");
    let url = url.to_string();
    block_on_engine(async move {
        let video = Video::new(url.as_str()).map_err(map_engine_error)?;
        let details = video.get_info().await.map_err(map_engine_error)?.video_details;

        let entry = EntryMetadata {
            id: Some(details.video_id.clone()),
            title: Some(details.title.clone()),
            duration_secs: details.length_seconds.parse().ok(),
            channel: details.author.as_ref().map(|a| a.name.clone()),
            ..EntryMetadata::default()
        };
        Ok(SourceMetadata {
            title: details.title,
            entries: vec![entry],
        })
    })
}

fn probe_playlist(url: &str) -> EngineResult<SourceMetadata> {
    info!("fetching playlist page: {url}");
    let url = url.to_string();
    block_on_engine(async move {
        let response = reqwest::Client::new()
            .get(&url)
            .header(
                "User-Agent",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
            )
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("failed to fetch playlist page: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound(format!("playlist not found: {url}")));
        }
        let html = response
            .text()
            .await
            .map_err(|e| EngineError::Transport(format!("failed to read playlist page: {e}")))?;

        let title =
            extract_page_title(&html).unwrap_or_else(|| "Unknown playlist".to_string());
        let mut entries = extract_playlist_entries(&html);
        if entries.is_empty() {
            warn!("no entries in playlist data, trying fallback extraction");
            entries = extract_entries_fallback(&html);
        }

        debug!("playlist '{title}' resolved to {} entries", entries.len());
        Ok(SourceMetadata { title, entries })
    })
}

/// Map a `rusty_ytdl` failure onto the typed adapter errors.
fn map_engine_error(err: rusty_ytdl::VideoError) -> EngineError {
    classify_failure(&err.to_string())
}

/// Classify an engine failure from its error text.
///
/// The engine reports failures as free text; the private/members-only and
/// removed-content phrasings are stable enough to split on.
fn classify_failure(raw: &str) -> EngineError {
    const RESTRICTED: [&str; 6] = [
        "private",
        "members-only",
        "members only",
        "sign in",
        "login required",
        "age restricted",
    ];
    const MISSING: [&str; 4] = ["not found", "unavailable", "does not exist", "removed"];

    let text = clean_error_text(raw);
    let lower = text.to_lowercase();
    if RESTRICTED.iter().any(|needle| lower.contains(needle)) {
        EngineError::AccessRestricted(text)
    } else if MISSING.iter().any(|needle| lower.contains(needle)) {
        EngineError::NotFound(text)
    } else {
        EngineError::Transport(text)
    }
}

fn is_playlist_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("/playlist") || lower.contains("list=")
}

fn video_options_for(options: &DownloadOptions) -> VideoOptions {
    let (quality, filter) = match options.mode {
        MediaMode::AudioOnly => (VideoQuality::HighestAudio, VideoSearchOptions::Audio),
        // rusty_ytdl selects best/worst rather than by pixel height.
        MediaMode::VideoAudio => match options.quality {
            Quality::Low360 => (VideoQuality::Lowest, VideoSearchOptions::VideoAudio),
            Quality::Medium720 | Quality::High1080 => {
                (VideoQuality::Highest, VideoSearchOptions::VideoAudio)
            }
        },
    };
    VideoOptions {
        quality,
        filter,
        ..VideoOptions::default()
    }
}

const fn extension_for(mode: MediaMode) -> &'static str {
    match mode {
        MediaMode::VideoAudio => "mp4",
        MediaMode::AudioOnly => "m4a",
    }
}

/// Sanitize a string for use as a filename.
fn sanitize_filename(name: &str) -> String {
    const INVALID: [char; 10] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

    let sanitized: String = name
        .chars()
        .map(|c| if INVALID.contains(&c) { '_' } else { c })
        .collect();

    // Trim whitespace and dots from ends, cap the length for the extension.
    sanitized.trim().trim_matches('.').chars().take(200).collect()
}

/// Extract the playlist title from the page HTML.
fn extract_page_title(html: &str) -> Option<String> {
    let og_title = Regex::new(r#"<meta\s+property="og:title"\s+content="([^"]+)""#).ok()?;
    if let Some(caps) = og_title.captures(html) {
        return Some(html_decode(caps.get(1)?.as_str()));
    }

    let page_title = Regex::new(r"<title>([^<]+?)\s*-\s*YouTube</title>").ok()?;
    if let Some(caps) = page_title.captures(html) {
        return Some(html_decode(caps.get(1)?.as_str()));
    }

    None
}

/// Extract playlist entries from the embedded `ytInitialData` JSON.
fn extract_playlist_entries(html: &str) -> Vec<EntryMetadata> {
    let Some(data) = extract_yt_initial_data(html) else {
        return Vec::new();
    };
    let Some(contents) = find_playlist_contents(&data) else {
        return Vec::new();
    };
    contents.iter().filter_map(parse_playlist_entry).collect()
}

/// Locate and parse the `ytInitialData` object embedded in the page.
fn extract_yt_initial_data(html: &str) -> Option<serde_json::Value> {
    let start_pos = html
        .find("var ytInitialData = ")
        .map(|pos| pos + "var ytInitialData = ".len())
        .or_else(|| {
            html.find("ytInitialData = ")
                .map(|pos| pos + "ytInitialData = ".len())
        })?;

    // Find the end of the JSON object by counting braces outside strings.
    let json_bytes = &html.as_bytes()[start_pos..];
    if json_bytes.first() != Some(&b'{') {
        return None;
    }

    let mut brace_count = 0i32;
    let mut end_pos = 0;
    let mut in_string = false;
    let mut escape_next = false;
    for (i, &byte) in json_bytes.iter().enumerate() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escape_next = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => brace_count += 1,
            b'}' if !in_string => {
                brace_count -= 1;
                if brace_count == 0 {
                    end_pos = i + 1;
                    break;
                }
            }
            _ => {}
        }
    }
    if end_pos == 0 {
        return None;
    }

    serde_json::from_str(&html[start_pos..start_pos + end_pos]).ok()
}

/// Navigate the parsed page data down to the playlist item list.
fn find_playlist_contents(json: &serde_json::Value) -> Option<&Vec<serde_json::Value>> {
    let tabs = json
        .get("contents")?
        .get("twoColumnBrowseResultsRenderer")?
        .get("tabs")?
        .as_array()?;

    for tab in tabs {
        let Some(sections) = tab
            .get("tabRenderer")
            .and_then(|t| t.get("content"))
            .and_then(|c| c.get("sectionListRenderer"))
            .and_then(|s| s.get("contents"))
            .and_then(|c| c.as_array())
        else {
            continue;
        };
        for section in sections {
            let Some(items) = section
                .get("itemSectionRenderer")
                .and_then(|s| s.get("contents"))
                .and_then(|c| c.as_array())
            else {
                continue;
            };
            for item in items {
                if let Some(renderer) = item.get("playlistVideoListRenderer") {
                    return renderer.get("contents")?.as_array();
                }
            }
        }
    }

    None
}

/// Parse one playlist member out of its renderer JSON.
fn parse_playlist_entry(item: &serde_json::Value) -> Option<EntryMetadata> {
    let renderer = item.get("playlistVideoRenderer")?;

    let id = renderer.get("videoId")?.as_str()?.to_string();
    let title = renderer
        .get("title")
        .and_then(|t| t.get("runs"))
        .and_then(|runs| runs.as_array())
        .and_then(|arr| arr.first())
        .and_then(|run| run.get("text"))
        .and_then(|t| t.as_str())
        .map(html_decode);

    let duration_secs = renderer
        .get("lengthSeconds")
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<u64>().ok())
        .or_else(|| {
            renderer
                .get("lengthText")
                .and_then(|lt| lt.get("simpleText"))
                .and_then(|st| st.as_str())
                .and_then(parse_duration_text)
        });

    let channel = renderer
        .get("shortBylineText")
        .and_then(|sbt| sbt.get("runs"))
        .and_then(|runs| runs.as_array())
        .and_then(|arr| arr.first())
        .and_then(|run| run.get("text"))
        .and_then(|t| t.as_str())
        .map(String::from);

    Some(EntryMetadata {
        id: Some(id),
        title,
        duration_secs,
        channel,
        ..EntryMetadata::default()
    })
}

/// Fallback: pull bare video ids out of the page with a regex.
fn extract_entries_fallback(html: &str) -> Vec<EntryMetadata> {
    let Ok(id_regex) = Regex::new(r#""videoId"\s*:\s*"([a-zA-Z0-9_-]{11})""#) else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    let mut entries = Vec::new();
    for caps in id_regex.captures_iter(html) {
        let Some(id) = caps.get(1).map(|m| m.as_str().to_string()) else {
            continue;
        };
        if !seen.insert(id.clone()) {
            continue;
        }
        entries.push(EntryMetadata {
            id: Some(id),
            ..EntryMetadata::default()
        });
    }
    entries.truncate(200);
    entries
}

/// Parse duration text like "3:45" or "1:23:45" into seconds.
fn parse_duration_text(text: &str) -> Option<u64> {
    let parts: Vec<&str> = text.split(':').collect();
    match parts.len() {
        2 => {
            let mins: u64 = parts[0].parse().ok()?;
            let secs: u64 = parts[1].parse().ok()?;
            Some(mins * 60 + secs)
        }
        3 => {
            let hours: u64 = parts[0].parse().ok()?;
            let mins: u64 = parts[1].parse().ok()?;
            let secs: u64 = parts[2].parse().ok()?;
            Some(hours * 3600 + mins * 60 + secs)
        }
        _ => None,
    }
}

/// Decode HTML entities in a string.
fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
}
