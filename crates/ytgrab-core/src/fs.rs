//! Filesystem helpers for batch destinations and downloaded files.

use std::io;
use std::path::Path;

use filetime::FileTime;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Ensure the destination directory exists and is writable.
///
/// Creates the directory if absent, then probes writability with a
/// temporary file. Called once per batch before any worker starts; a
/// failure here fails the whole dispatch, not individual items.
pub fn ensure_writable_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| Error::DestinationNotWritable {
            path: path.to_path_buf(),
            reason: format!("could not create directory: {e}"),
        })?;
        info!("created destination directory: {}", path.display());
    } else if !path.is_dir() {
        return Err(Error::DestinationNotWritable {
            path: path.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }

    tempfile::tempfile_in(path).map_err(|e| Error::DestinationNotWritable {
        path: path.to_path_buf(),
        reason: format!("write probe failed: {e}"),
    })?;
    Ok(())
}

/// Set a downloaded file's timestamps to its upload date (noon UTC).
///
/// Accepts `YYYYMMDD` or `YYYY-MM-DD` dates.
pub fn apply_upload_timestamp(file: &Path, upload_date: &str) -> Result<()> {
    let (year, month, day) = parse_upload_date(upload_date).ok_or_else(|| {
        Error::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unparseable upload date '{upload_date}'"),
        ))
    })?;

    let timestamp = FileTime::from_unix_time(unix_noon(year, month, day), 0);
    filetime::set_file_times(file, timestamp, timestamp)?;
    debug!(
        "set timestamp of {} to {year:04}-{month:02}-{day:02}",
        file.display()
    );
    Ok(())
}

/// Parse `YYYYMMDD` or `YYYY-MM-DD` into (year, month, day).
fn parse_upload_date(date: &str) -> Option<(i64, u32, u32)> {
    let digits: String = date.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != 8 {
        return None;
    }

    let year: i64 = digits.get(0..4)?.parse().ok()?;
    let month: u32 = digits.get(4..6)?.parse().ok()?;
    let day: u32 = digits.get(6..8)?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some((year, month, day))
}

/// Unix timestamp of noon UTC on the given Gregorian date.
const fn unix_noon(year: i64, month: u32, day: u32) -> i64 {
    days_from_epoch(year, month, day) * 86_400 + 12 * 3_600
}

/// Days between the Unix epoch and a Gregorian date.
const fn days_from_epoch(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = if year >= 0 { year } else { year - 399 } / 400;
    let year_of_era = year - era * 400;
    let month_prime = (if month > 2 { month - 3 } else { month + 9 }) as i64;
    let day_of_year = (153 * month_prime + 2) / 5 + day as i64 - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}
