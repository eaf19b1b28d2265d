//! Crash-loop guard: repeated starts inside a short window delay startup.

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::cmp;
use std::path::Path;
use std::thread;
use std::time::Duration as StdDuration;
use tracing::warn;

const WINDOW_SECS: i64 = 120;
const MAX_STARTS: usize = 3;
const BACKOFF_STEP_SECS: u64 = 10;
const BACKOFF_MAX_SECS: u64 = 60;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StartLog {
    starts: Vec<String>,
    #[serde(default)]
    last_backoff_secs: Option<u64>,
}

/// What `get_health` reports about recent restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackoffSnapshot {
    pub recent_starts: usize,
    pub window_secs: i64,
    pub last_backoff_secs: Option<u64>,
}

pub fn apply_startup_backoff(path: &Path) {
    let now = Utc::now();
    let mut log = load_log(path).unwrap_or_default();
    let delay = record_start(now, &mut log);
    log.last_backoff_secs = delay;

    if let Err(err) = save_log(path, &log) {
        warn!(error = %err, "Failed to persist daemon backoff state");
    }

    if let Some(secs) = delay {
        warn!(
            count = log.starts.len(),
            backoff_secs = secs,
            "Daemon start backoff engaged"
        );
        thread::sleep(StdDuration::from_secs(secs));
    }
}

pub fn snapshot(path: &Path) -> Option<BackoffSnapshot> {
    let log = load_log(path).ok()?;
    let now = Utc::now();
    let recent_starts = log
        .starts
        .iter()
        .filter(|value| within_window(now, value))
        .count();
    Some(BackoffSnapshot {
        recent_starts,
        window_secs: WINDOW_SECS,
        last_backoff_secs: log.last_backoff_secs,
    })
}

/// Appends `now` to the log, forgetting starts outside the window, and
/// returns the delay owed for starts beyond the allowance.
fn record_start(now: DateTime<Utc>, log: &mut StartLog) -> Option<u64> {
    log.starts.retain(|value| within_window(now, value));
    log.starts.push(now.to_rfc3339());

    if log.starts.len() <= MAX_STARTS {
        return None;
    }

    let extra = log.starts.len().saturating_sub(MAX_STARTS) as u64;
    Some(cmp::min(
        BACKOFF_STEP_SECS.saturating_mul(extra),
        BACKOFF_MAX_SECS,
    ))
}

fn within_window(now: DateTime<Utc>, value: &str) -> bool {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| {
            now.signed_duration_since(timestamp.with_timezone(&Utc))
                .num_seconds()
                <= WINDOW_SECS
        })
        .unwrap_or(false)
}

fn load_log(path: &Path) -> Result<StartLog, String> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(StartLog::default()),
        Err(err) => return Err(format!("Failed to read backoff state: {}", err)),
    };

    serde_json::from_slice(&data).map_err(|err| format!("Failed to parse backoff state: {}", err))
}

fn save_log(path: &Path, log: &StartLog) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("Failed to create daemon backoff dir: {}", err))?;
    }

    let payload = serde_json::to_vec_pretty(log)
        .map_err(|err| format!("Failed to serialize backoff state: {}", err))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload)
        .map_err(|err| format!("Failed to write backoff state: {}", err))?;
    fs::rename(&tmp_path, path)
        .map_err(|err| format!("Failed to commit backoff state: {}", err))?;
    Ok(())
}
