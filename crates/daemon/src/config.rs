//! Configuration management for the LanShare daemon.
//!
//! Settings come from three layers, later layers winning:
//!
//! 1. The TOML file (default `~/.config/lanshare/config.toml`)
//! 2. `LANSHARE_*` environment variables
//! 3. Command-line flags (applied by the binary)
//!
//! Every section is `#[serde(default)]`, so a partial or empty file is valid.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no shared directory configured (use --dir or [share] root_dir)")]
    MissingRootDir,

    #[error("shared directory does not exist or is not a directory: {0}")]
    RootDirNotFound(PathBuf),

    #[error("ttl_minutes must be between 1 and {max}, got {0}", max = MAX_SESSION_MINUTES)]
    InvalidTtl(u64),

    #[error("idle_minutes must be between 1 and {max}, got {0}", max = MAX_SESSION_MINUTES)]
    InvalidIdle(u64),

    #[error("max_upload_mb must be at least 1, got {0}")]
    InvalidMaxUpload(u64),

    #[error("port must be between 1 and 65535, got {0}")]
    InvalidPort(u16),

    #[error("port range {start}-{end} is empty or invalid")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("bind address is not a valid IP address: {0}")]
    InvalidBind(String),

    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error(
        "access log rotation needs max_size_mb between 1 and {max} and max_generations >= 1",
        max = MAX_LOG_SIZE_MB
    )]
    InvalidRotation,
}

/// Longest accepted TTL or idle budget: one leap year.
pub const MAX_SESSION_MINUTES: u64 = 366 * 24 * 60;

/// Largest accepted access log size before rotation.
pub const MAX_LOG_SIZE_MB: u64 = u64::MAX / (1024 * 1024);

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Default name of the uploads area inside the shared directory.
pub const DEFAULT_UPLOADS_DIR: &str = "_uploads";

/// Main configuration structure for the LanShare daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// What is shared and how.
    pub share: ShareConfig,

    /// HTTP listener settings.
    pub server: ServerConfig,

    /// Session lifetime limits.
    pub session: SessionConfig,

    /// Access control settings.
    pub security: SecurityConfig,

    /// Diagnostic and access logging.
    pub log: LogConfig,
}

/// Shared directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShareConfig {
    /// Directory exposed to clients.
    pub root_dir: Option<PathBuf>,

    /// Name of the uploads area below `root_dir`.
    pub uploads_dir: String,

    /// Disable uploads.
    pub read_only: bool,

    /// Upload size limit per request, in megabytes.
    pub max_upload_mb: u64,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: String,

    /// Fixed port. Startup fails when it is busy; when unset, the port range
    /// is scanned.
    pub port: Option<u16>,

    /// First port tried when scanning.
    pub port_range_start: u16,

    /// Last port tried when scanning.
    pub port_range_end: u16,

    /// Seconds in-flight requests get once the session stops.
    pub shutdown_grace_secs: u64,

    /// Open the share URL in the default browser after startup.
    pub open_browser: bool,

    /// Print a QR code of the share URL in the startup banner.
    pub show_qr: bool,
}

/// Session lifetime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Absolute lifetime of the share.
    pub ttl_minutes: u64,

    /// Inactivity budget before the share ends.
    pub idle_minutes: u64,
}

/// Access control configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// Fixed capability token. Unset or `"auto"` generates one per run.
    pub token: Option<String>,

    /// Comma-separated IPv4 CIDR ranges allowed to connect.
    pub allow: Option<String>,

    /// Character and name restrictions for client paths.
    pub path_policy: PathPolicy,
}

/// Which path restrictions to enforce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PathPolicy {
    /// Reject names that are problematic on any major platform.
    #[default]
    Portable,
    /// Reject only what POSIX filesystems reject.
    Posix,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,

    /// Directory for daily diagnostic log files. Console only when unset.
    pub dir: Option<PathBuf>,

    /// JSON-lines access log.
    pub access_log: PathBuf,

    /// Rotate the access log when it reaches this size.
    pub max_size_mb: u64,

    /// Number of rotated access logs kept.
    pub max_generations: u32,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            uploads_dir: DEFAULT_UPLOADS_DIR.to_string(),
            read_only: false,
            max_upload_mb: 200,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: None,
            port_range_start: 8000,
            port_range_end: 8100,
            shutdown_grace_secs: 5,
            open_browser: false,
            show_qr: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 60,
            idle_minutes: 30,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            access_log: default_data_dir().join("access.log"),
            max_size_mb: 10,
            max_generations: 5,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lanshare")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lanshare")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - LANSHARE_LOG_LEVEL: Override log level
    /// - LANSHARE_BIND: Override bind address
    /// - LANSHARE_ALLOW: Override the allow list
    ///
    /// Runs before tracing is initialized (the log level may come from the
    /// environment), so the names of the variables applied are returned for
    /// the caller to log.
    pub fn apply_env_overrides(&mut self) -> Vec<&'static str> {
        let mut applied = Vec::new();

        if let Some(level) = non_empty_env("LANSHARE_LOG_LEVEL") {
            self.log.level = level;
            applied.push("LANSHARE_LOG_LEVEL");
        }

        if let Some(bind) = non_empty_env("LANSHARE_BIND") {
            self.server.bind = bind;
            applied.push("LANSHARE_BIND");
        }

        if let Some(allow) = non_empty_env("LANSHARE_ALLOW") {
            self.security.allow = Some(allow);
            applied.push("LANSHARE_ALLOW");
        }

        applied
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let root = self
            .share
            .root_dir
            .as_ref()
            .ok_or(ConfigError::MissingRootDir)?;
        if !root.is_dir() {
            return Err(ConfigError::RootDirNotFound(root.clone()));
        }

        if !(1..=MAX_SESSION_MINUTES).contains(&self.session.ttl_minutes) {
            return Err(ConfigError::InvalidTtl(self.session.ttl_minutes));
        }

        if !(1..=MAX_SESSION_MINUTES).contains(&self.session.idle_minutes) {
            return Err(ConfigError::InvalidIdle(self.session.idle_minutes));
        }

        if self.share.max_upload_mb == 0 {
            return Err(ConfigError::InvalidMaxUpload(self.share.max_upload_mb));
        }

        if let Some(0) = self.server.port {
            return Err(ConfigError::InvalidPort(0));
        }

        let (start, end) = (self.server.port_range_start, self.server.port_range_end);
        if start == 0 || start > end {
            return Err(ConfigError::InvalidPortRange { start, end });
        }

        self.bind_addr()?;

        let level = self.log.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log.level.clone()));
        }

        if !(1..=MAX_LOG_SIZE_MB).contains(&self.log.max_size_mb)
            || self.log.max_generations == 0
        {
            return Err(ConfigError::InvalidRotation);
        }

        Ok(())
    }

    /// The parsed bind address.
    pub fn bind_addr(&self) -> Result<IpAddr, ConfigError> {
        self.server
            .bind
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.server.bind.clone()))
    }

    /// Session TTL.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.session.ttl_minutes.saturating_mul(60))
    }

    /// Idle budget.
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.session.idle_minutes.saturating_mul(60))
    }

    /// Upload limit in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.share.max_upload_mb.saturating_mul(1024 * 1024)
    }

    /// Configured token, or `None` when one should be generated.
    pub fn fixed_token(&self) -> Option<&str> {
        self.security
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("auto"))
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
