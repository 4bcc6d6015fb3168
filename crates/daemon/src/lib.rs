//! # LanShare Daemon Library
//!
//! This crate provides the server side of LanShare: an ephemeral,
//! LAN-scoped file share that exposes one directory behind a capability URL
//! for a bounded lifetime.
//!
//! ## Overview
//!
//! The daemon wraps the [`perimeter`] crate with everything needed to run it:
//!
//! - **Configuration**: TOML file, environment and CLI layers
//! - **HTTP Router**: axum routes behind the allow list and token gate
//! - **File Operations**: listing, streaming downloads and uploads
//! - **Access Log**: JSON lines with size-based rotation
//! - **User Interface**: startup banner and QR code of the share URL
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Share Orchestrator                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐   │
//! │  │  Allow List  │  │  Token Gate  │  │  Session Lifecycle   │   │
//! │  └──────────────┘  └──────────────┘  └──────────────────────┘   │
//! │                                                                 │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                      HTTP Router                          │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                                                                 │
//! │  ┌───────────────────┐  ┌───────────────────────────────────┐   │
//! │  │  Share Areas      │  │        Access Log                 │   │
//! │  └───────────────────┘  └───────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, ShareOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.share.root_dir = Some("/srv/share".into());
//!
//!     let mut orchestrator = ShareOrchestrator::new(config)?;
//!     let url = orchestrator.start().await?;
//!     println!("Sharing at {url}");
//!
//!     // Runs until the TTL or idle budget runs out.
//!     let reason = orchestrator.wait().await;
//!     orchestrator.stop().await?;
//!     println!("Stopped: {reason}");
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`files`]: Listing, download and upload helpers
//! - [`logging`]: Tracing setup and the access log
//! - [`network`]: LAN address selection and listener binding
//! - [`router`]: HTTP routes and the perimeter middleware
//! - [`ui`]: Startup banner and QR code
//! - [`orchestrator`]: Main share coordinator

pub mod config;
pub mod files;
pub mod logging;
pub mod network;
pub mod orchestrator;
pub mod router;
pub mod ui;

// Re-export perimeter for convenience
pub use perimeter;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export files types for convenience
pub use files::{Area, DirectoryListing, ShareAreas};

// Re-export logging types for convenience
pub use logging::{init_tracing, AccessLog};

// Re-export router types for convenience
pub use router::{build_router, ApiError, AppState, ShareSettings};

// Re-export UI types for convenience
pub use ui::{generate_terminal_qr, Banner, TokenOrigin};

// Re-export orchestrator types for convenience
pub use orchestrator::{OrchestratorEvent, OrchestratorState, ShareOrchestrator};
