//! AL-015: Append-only JSONL provenance event log.

use crate::core::error::{AlbumError, Result};
use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Current UTC time as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn now_iso8601() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    iso8601_from_secs(secs)
}

/// Format seconds since the Unix epoch as an ISO 8601 UTC timestamp.
pub fn iso8601_from_secs(secs: u64) -> String {
    let days = secs / 86400;
    let time_secs = secs % 86400;
    let (hours, minutes, seconds) = (time_secs / 3600, (time_secs % 3600) / 60, time_secs % 60);

    let mut year = 1970i64;
    let mut remaining = days as i64;
    loop {
        let year_days = if is_leap(year) { 366 } else { 365 };
        if remaining < year_days {
            break;
        }
        remaining -= year_days;
        year += 1;
    }
    let feb = if is_leap(year) { 29 } else { 28 };
    let month_days = [31, feb, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month = 12;
    for (i, &md) in month_days.iter().enumerate() {
        if remaining < md {
            month = i + 1;
            break;
        }
        remaining -= md;
    }

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        remaining + 1,
        hours,
        minutes,
        seconds
    )
}

fn is_leap(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

/// Derive the event log path under the album base directory.
pub fn event_log_path(base_dir: &Path) -> PathBuf {
    base_dir.join("events.jsonl")
}

/// Append an event to the provenance log.
pub fn append_event(base_dir: &Path, event: ProvenanceEvent) -> Result<()> {
    let path = event_log_path(base_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AlbumError::io(parent, e))?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(AlbumError::serialization)?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| AlbumError::io(&path, e))?;

    writeln!(file, "{}", json).map_err(|e| AlbumError::io(&path, e))?;

    Ok(())
}

/// Append an event, downgrading a failure to a warning.
pub fn record(base_dir: &Path, event: ProvenanceEvent) {
    if let Err(e) = append_event(base_dir, event) {
        tracing::warn!("cannot write provenance event: {}", e);
    }
}

/// Read back every event in the log (oldest first).
pub fn read_events(base_dir: &Path) -> Result<Vec<TimestampedEvent>> {
    let path = event_log_path(base_dir);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path).map_err(|e| AlbumError::io(&path, e))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(AlbumError::serialization))
        .collect()
}
