//! LanShare
//!
//! Share a directory on the local network for a limited time.

use std::path::PathBuf;

use clap::Parser;
use daemon::config::{Config, MAX_SESSION_MINUTES};
use daemon::logging::init_tracing;
use daemon::orchestrator::{OrchestratorEvent, ShareOrchestrator};
use perimeter::StopReason;

/// LanShare - share a directory on the LAN behind a one-time capability URL.
#[derive(Parser, Debug)]
#[command(name = "lanshare")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory to share
    #[arg(long, value_name = "PATH")]
    pub dir: Option<PathBuf>,

    /// Port to listen on (default: first free port in 8000-8100)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Address to bind to
    #[arg(long, value_name = "IP")]
    pub bind: Option<String>,

    /// Session lifetime in minutes
    #[arg(
        long,
        value_name = "MINUTES",
        value_parser = clap::value_parser!(u64).range(1..=MAX_SESSION_MINUTES)
    )]
    pub ttl: Option<u64>,

    /// Stop after this many minutes without requests
    #[arg(
        long,
        value_name = "MINUTES",
        value_parser = clap::value_parser!(u64).range(1..=MAX_SESSION_MINUTES)
    )]
    pub idle: Option<u64>,

    /// Capability token, or "auto" to generate one
    #[arg(long)]
    pub token: Option<String>,

    /// Comma-separated IPv4 CIDR ranges allowed to connect
    #[arg(long, value_name = "CIDR,...")]
    pub allow: Option<String>,

    /// Maximum upload size per request in megabytes
    #[arg(long, value_name = "MB", value_parser = clap::value_parser!(u64).range(1..))]
    pub max_upload_mb: Option<u64>,

    /// Access log file
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Open the share URL in the default browser
    #[arg(long)]
    pub open: bool,

    /// Disable uploads
    #[arg(long)]
    pub readonly: bool,

    /// Do not print a QR code of the share URL
    #[arg(long)]
    pub no_qr: bool,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Apply command-line flags on top of the file and environment layers.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(dir) = &self.dir {
            config.share.root_dir = Some(dir.clone());
        }
        if self.port.is_some() {
            config.server.port = self.port;
        }
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(ttl) = self.ttl {
            config.session.ttl_minutes = ttl;
        }
        if let Some(idle) = self.idle {
            config.session.idle_minutes = idle;
        }
        if let Some(token) = &self.token {
            config.security.token = Some(token.clone());
        }
        if let Some(allow) = &self.allow {
            config.security.allow = Some(allow.clone());
        }
        if let Some(max) = self.max_upload_mb {
            config.share.max_upload_mb = max;
        }
        if let Some(log) = &self.log {
            config.log.access_log = log.clone();
        }
        if self.open {
            config.server.open_browser = true;
        }
        if self.readonly {
            config.share.read_only = true;
        }
        if self.no_qr {
            config.server.show_qr = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable and command-line overrides
    let env_overrides = config.apply_env_overrides();
    cli.apply_overrides(&mut config);

    // Initialize tracing
    let _log_guard = init_tracing(&config.log.level, cli.verbose, config.log.dir.as_deref())?;

    tracing::info!("LanShare starting...");
    for variable in env_overrides {
        tracing::info!("Configuration overridden from environment: {}", variable);
    }
    if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
    }

    let open_browser = config.server.open_browser;
    let mut orchestrator = ShareOrchestrator::new(config)?;
    let url = orchestrator.start().await?;

    print!("{}", orchestrator.banner().render());

    if open_browser {
        if let Err(e) = webbrowser::open(&url) {
            tracing::warn!("Failed to open browser: {}", e);
        }
    }

    // Spawn event logging task
    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::debug!("Orchestrator state: {:?}", state);
                }
                OrchestratorEvent::Listening { addr, .. } => {
                    tracing::debug!("Listening on {}", addr);
                }
                OrchestratorEvent::SessionEnded { reason } => {
                    tracing::debug!("Session ended: {}", reason);
                }
                OrchestratorEvent::Error { message } => {
                    tracing::error!("Orchestrator error: {}", message);
                }
            }
        }
    });

    tokio::select! {
        reason = orchestrator.wait() => {
            tracing::info!("Session ending: {}", reason);
        }
        _ = wait_for_shutdown_signal() => {
            orchestrator.lifecycle().request_shutdown(StopReason::UserInterrupt);
        }
    }

    let reason = orchestrator.stop().await?;
    println!("Shutting down: {}", reason.description());

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        _ => {
            tracing::warn!("Failed to register signal handlers, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C).
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received Ctrl+C");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_flags() {
        let cli = Cli::try_parse_from(["lanshare"]).unwrap();
        assert!(cli.dir.is_none());
        assert!(cli.port.is_none());
        assert!(!cli.readonly);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_all_flags() {
        let cli = Cli::try_parse_from([
            "lanshare",
            "--dir",
            "/srv/share",
            "--port",
            "8080",
            "--bind",
            "127.0.0.1",
            "--ttl",
            "15",
            "--idle",
            "5",
            "--token",
            "auto",
            "--allow",
            "192.168.1.0/24,10.0.0.0/8",
            "--max-upload-mb",
            "50",
            "--log",
            "/tmp/access.log",
            "--open",
            "--readonly",
            "--no-qr",
            "-v",
        ])
        .unwrap();

        assert_eq!(cli.dir, Some(PathBuf::from("/srv/share")));
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.ttl, Some(15));
        assert_eq!(cli.idle, Some(5));
        assert_eq!(cli.token.as_deref(), Some("auto"));
        assert_eq!(cli.max_upload_mb, Some(50));
        assert!(cli.open && cli.readonly && cli.no_qr && cli.verbose);
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(Cli::try_parse_from(["lanshare", "--port", "0"]).is_err());
        assert!(Cli::try_parse_from(["lanshare", "--ttl", "0"]).is_err());
        assert!(Cli::try_parse_from(["lanshare", "--idle", "0"]).is_err());
        assert!(Cli::try_parse_from(["lanshare", "--max-upload-mb", "0"]).is_err());
    }

    #[test]
    fn test_session_minutes_upper_bound() {
        let too_long = (MAX_SESSION_MINUTES + 1).to_string();
        assert!(Cli::try_parse_from(["lanshare", "--ttl", &too_long]).is_err());
        assert!(Cli::try_parse_from(["lanshare", "--idle", &too_long]).is_err());
        assert!(Cli::try_parse_from(["lanshare", "--ttl", "18446744073709551615"]).is_err());

        let longest = MAX_SESSION_MINUTES.to_string();
        let cli = Cli::try_parse_from(["lanshare", "--ttl", &longest]).unwrap();
        assert_eq!(cli.ttl, Some(MAX_SESSION_MINUTES));
    }

    #[test]
    fn test_invalid_port_rejected() {
        assert!(Cli::try_parse_from(["lanshare", "--port", "70000"]).is_err());
        assert!(Cli::try_parse_from(["lanshare", "--port", "abc"]).is_err());
    }

    #[test]
    fn test_config_flag() {
        let cli = Cli::try_parse_from(["lanshare", "-c", "/etc/lanshare.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/lanshare.toml")));
    }

    #[test]
    fn test_overrides_applied() {
        let cli = Cli::try_parse_from([
            "lanshare",
            "--dir",
            "/srv/share",
            "--ttl",
            "15",
            "--readonly",
            "--no-qr",
            "--log",
            "/tmp/access.log",
        ])
        .unwrap();

        let mut config = Config::default();
        config.session.idle_minutes = 7;
        cli.apply_overrides(&mut config);

        assert_eq!(config.share.root_dir, Some(PathBuf::from("/srv/share")));
        assert_eq!(config.session.ttl_minutes, 15);
        assert_eq!(config.session.idle_minutes, 7);
        assert!(config.share.read_only);
        assert!(!config.server.show_qr);
        assert_eq!(config.log.access_log, PathBuf::from("/tmp/access.log"));
        assert!(config.server.port.is_none());
    }
}
