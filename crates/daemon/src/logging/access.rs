//! JSON-lines access log.
//!
//! Every entry is a single JSON object on its own line. Request entries carry
//! no `event` field; lifecycle entries carry `"event": "start"` or
//! `"event": "stop"`. Absent optional fields are omitted rather than written
//! as `null`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use perimeter::StopReason;
use serde::Serialize;
use tracing::warn;

use super::rotation::LogRotator;

/// Eight hex characters identifying one request in the log.
pub fn new_request_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// One handled request.
#[derive(Debug, Clone, Serialize)]
pub struct AccessEntry {
    pub ts: DateTime<Utc>,
    pub rid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub method: String,
    /// Path with the token already stripped.
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub status: u16,
    /// Bytes sent for downloads, received for uploads.
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ua: Option<String>,
    /// Handling time in milliseconds.
    pub dur: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// Session start.
#[derive(Debug, Clone, Serialize)]
pub struct StartEntry {
    pub ts: DateTime<Utc>,
    pub event: &'static str,
    pub version: &'static str,
    pub root: String,
    pub bind: String,
    pub port: u16,
    /// Redacted form only.
    pub token: String,
    /// TTL in minutes.
    pub ttl: u64,
    /// Idle budget in minutes.
    pub idle: u64,
}

impl StartEntry {
    pub fn new(root: &Path, bind: String, port: u16, token: String, ttl: u64, idle: u64) -> Self {
        Self {
            ts: Utc::now(),
            event: "start",
            version: env!("CARGO_PKG_VERSION"),
            root: root.display().to_string(),
            bind,
            port,
            token,
            ttl,
            idle,
        }
    }
}

/// Session end.
#[derive(Debug, Clone, Serialize)]
pub struct StopEntry {
    pub ts: DateTime<Utc>,
    pub event: &'static str,
    pub reason: StopReason,
    /// Uptime in seconds.
    pub uptime: u64,
}

impl StopEntry {
    pub fn new(reason: StopReason, uptime: u64) -> Self {
        Self {
            ts: Utc::now(),
            event: "stop",
            reason,
            uptime,
        }
    }
}

/// Appends entries to a size-rotated JSON-lines file.
///
/// Write failures are logged and otherwise ignored; the access log never
/// fails a request.
#[derive(Debug)]
pub struct AccessLog {
    rotator: Option<LogRotator>,
    lock: Mutex<()>,
}

impl AccessLog {
    /// Log to `path`, rotating at `max_size_mb` and keeping `max_generations`.
    pub fn new(path: impl Into<PathBuf>, max_size_mb: u64, max_generations: u32) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "Failed to create access log directory");
            }
        }

        Self {
            rotator: Some(LogRotator::new(
                path,
                max_size_mb.saturating_mul(1024 * 1024),
                max_generations,
            )),
            lock: Mutex::new(()),
        }
    }

    /// An access log that discards everything.
    pub fn disabled() -> Self {
        Self {
            rotator: None,
            lock: Mutex::new(()),
        }
    }

    /// The live log file, if enabled.
    pub fn path(&self) -> Option<&Path> {
        self.rotator.as_ref().map(LogRotator::path)
    }

    pub fn log_access(&self, entry: &AccessEntry) {
        self.write(entry);
    }

    /// Append a request entry from async code.
    ///
    /// Rotation and the append run on the blocking pool; the returned future
    /// resolves once the line is written, so entries keep request order.
    pub async fn record(self: &Arc<Self>, entry: AccessEntry) {
        let log = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || log.log_access(&entry)).await {
            warn!(error = %e, "Access log writer task failed");
        }
    }

    pub fn log_start(&self, entry: &StartEntry) {
        self.write(entry);
    }

    pub fn log_stop(&self, entry: &StopEntry) {
        self.write(entry);
    }

    fn write<T: Serialize>(&self, entry: &T) {
        let Some(rotator) = &self.rotator else {
            return;
        };

        let mut line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize access log entry");
                return;
            }
        };
        line.push('\n');

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Err(e) = rotator.rotate_if_needed() {
            warn!(path = %rotator.path().display(), error = %e, "Failed to rotate access log");
        }

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(rotator.path())
            .and_then(|mut file| file.write_all(line.as_bytes()));

        if let Err(e) = result {
            warn!(path = %rotator.path().display(), error = %e, "Failed to write access log");
        }
    }
}
