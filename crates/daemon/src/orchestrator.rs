//! Share orchestrator for wiring together all components.
//!
//! This module provides the `ShareOrchestrator` that builds the perimeter
//! (allow list, token gate, containment validators, session lifecycle) from
//! the configuration, binds the listener, serves the router until the session
//! ends and writes the start and stop entries of the access log.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use perimeter::{
    AllowList, CapabilityToken, ContainmentPolicy, ContainmentRoot, LifecycleTimers,
    SessionLifecycle, StopReason, TokenGate,
};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, PathPolicy};
use crate::files::ShareAreas;
use crate::logging::{AccessLog, StartEntry, StopEntry};
use crate::network::{advertised_host, bind_listener};
use crate::router::{build_router, AppState, ShareSettings};
use crate::ui::{generate_terminal_qr, Banner, TokenOrigin};

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Binding the listener.
    Starting,
    /// Serving requests.
    Running,
    /// Draining in-flight requests.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// The listener is bound and the share is reachable.
    Listening { addr: SocketAddr, url: String },
    /// The session ended.
    SessionEnded { reason: StopReason },
    /// Error occurred.
    Error { message: String },
}

/// Orchestrator that owns one share session.
pub struct ShareOrchestrator {
    /// Configuration.
    config: Config,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Shared and uploads areas.
    areas: Arc<ShareAreas>,
    /// Network allow list.
    allow_list: Arc<AllowList>,
    /// Capability token gate.
    gate: Arc<TokenGate>,
    /// Whether the token was generated or configured.
    token_origin: TokenOrigin,
    /// Session TTL and idle supervisor.
    lifecycle: Arc<SessionLifecycle>,
    /// JSON-lines access log.
    access_log: Arc<AccessLog>,
    /// Lifecycle timer tasks, aborted on drop.
    timers: Option<LifecycleTimers>,
    /// The axum server task.
    server: Option<JoinHandle<std::io::Result<()>>>,
    /// Bound address, once started.
    local_addr: Option<SocketAddr>,
    /// Share URL, once started.
    share_url: Option<String>,
    /// Event sender.
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl ShareOrchestrator {
    /// Creates a new orchestrator from a configuration.
    ///
    /// Validates the configuration and builds every perimeter component;
    /// any failure here is fatal for startup.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let root_dir = config
            .share
            .root_dir
            .as_ref()
            .context("No shared directory configured")?;
        let root = ContainmentRoot::new(root_dir)
            .with_context(|| format!("Failed to open shared directory {}", root_dir.display()))?;

        let policy = match config.security.path_policy {
            PathPolicy::Portable => ContainmentPolicy::portable(),
            PathPolicy::Posix => ContainmentPolicy::posix(),
        };
        let areas = ShareAreas::new(root, &config.share.uploads_dir, policy)
            .context("Failed to set up the uploads area")?;

        let allow_list =
            AllowList::parse(config.security.allow.as_deref()).context("Invalid allow list")?;

        let (token, token_origin) = match config.fixed_token() {
            Some(fixed) => (
                CapabilityToken::new(fixed).context("Invalid token")?,
                TokenOrigin::Configured,
            ),
            None => (CapabilityToken::generate(), TokenOrigin::Generated),
        };

        let lifecycle = Arc::new(SessionLifecycle::new(config.ttl(), config.idle()));

        let access_log = AccessLog::new(
            &config.log.access_log,
            config.log.max_size_mb,
            config.log.max_generations,
        );

        debug!(
            root = %areas.shared_root().display(),
            uploads = %areas.uploads_root().display(),
            allow = %allow_list,
            token = %token,
            "Perimeter initialized"
        );

        let (event_tx, _) = broadcast::channel(32);

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            areas: Arc::new(areas),
            allow_list: Arc::new(allow_list),
            gate: Arc::new(TokenGate::new(token)),
            token_origin,
            lifecycle,
            access_log: Arc::new(access_log),
            timers: None,
            server: None,
            local_addr: None,
            share_url: None,
            event_tx,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Returns the session lifecycle.
    pub fn lifecycle(&self) -> &Arc<SessionLifecycle> {
        &self.lifecycle
    }

    /// Returns the token gate.
    pub fn gate(&self) -> &Arc<TokenGate> {
        &self.gate
    }

    /// Returns the bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the share URL, once started.
    pub fn share_url(&self) -> Option<&str> {
        self.share_url.as_deref()
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.lifecycle.shutdown_token()
    }

    /// Binds the listener, starts the lifecycle timers and serves requests.
    ///
    /// Returns the share URL.
    pub async fn start(&mut self) -> Result<String> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting share...");

        let bind = self.config.bind_addr()?;
        let range = self.config.server.port_range_start..=self.config.server.port_range_end;
        let listener = match bind_listener(bind, self.config.server.port, range).await {
            Ok(listener) => listener,
            Err(e) => {
                *self.state.write().await = OrchestratorState::Stopped;
                self.emit_event(OrchestratorEvent::Error {
                    message: e.to_string(),
                });
                return Err(e).context("Failed to bind listener");
            }
        };
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;

        let url = format!(
            "http://{}:{}{}",
            advertised_host(bind),
            local_addr.port(),
            self.gate.share_path()
        );

        let state = AppState {
            areas: Arc::clone(&self.areas),
            allow_list: Arc::clone(&self.allow_list),
            gate: Arc::clone(&self.gate),
            lifecycle: Arc::clone(&self.lifecycle),
            access_log: Arc::clone(&self.access_log),
            settings: Arc::new(ShareSettings {
                read_only: self.config.share.read_only,
                max_upload_mb: self.config.share.max_upload_mb,
                share_url: Some(url.clone()),
            }),
        };
        let app = build_router(state);

        let shutdown = self.lifecycle.shutdown_token();
        let lifecycle = Arc::clone(&self.lifecycle);
        self.server = Some(tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

            if let Err(e) = &result {
                error!("Server failed: {}", e);
                lifecycle.request_shutdown(StopReason::Error);
            }
            result
        }));

        self.timers = Some(self.lifecycle.spawn_timers());
        self.local_addr = Some(local_addr);
        self.share_url = Some(url.clone());

        self.access_log.log_start(&StartEntry::new(
            self.areas.shared_root(),
            bind.to_string(),
            local_addr.port(),
            self.gate.token().redacted(),
            self.config.session.ttl_minutes,
            self.config.session.idle_minutes,
        ));

        *self.state.write().await = OrchestratorState::Running;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));
        self.emit_event(OrchestratorEvent::Listening {
            addr: local_addr,
            url: url.clone(),
        });

        info!(addr = %local_addr, "Share started");
        Ok(url)
    }

    /// Waits until the session is asked to stop, for whatever reason.
    pub async fn wait(&self) -> StopReason {
        self.lifecycle.stopping().await;
        self.lifecycle.stop_reason().unwrap_or(StopReason::Error)
    }

    /// Stops the share, draining in-flight requests for at most the
    /// configured grace period.
    ///
    /// If nothing requested shutdown yet, the stop is recorded as a user
    /// interrupt. Returns the reason the session ended.
    pub async fn stop(&mut self) -> Result<StopReason> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(self.lifecycle.stop_reason().unwrap_or(StopReason::UserInterrupt));
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        self.lifecycle.request_shutdown(StopReason::UserInterrupt);
        let reason = self.lifecycle.stop_reason().unwrap_or(StopReason::UserInterrupt);
        info!("Stopping share: {}", reason.description());

        if let Some(mut server) = self.server.take() {
            let grace = Duration::from_secs(self.config.server.shutdown_grace_secs);
            match tokio::time::timeout(grace, &mut server).await {
                Ok(Ok(Ok(()))) => debug!("Server drained"),
                Ok(Ok(Err(e))) => warn!("Server exited with error: {}", e),
                Ok(Err(e)) => warn!("Server task failed: {}", e),
                Err(_) => {
                    warn!("In-flight requests did not finish within {:?}, aborting", grace);
                    server.abort();
                }
            }
        }

        self.timers = None;
        self.lifecycle.mark_stopped();
        self.access_log
            .log_stop(&StopEntry::new(reason, self.lifecycle.uptime_secs()));

        *self.state.write().await = OrchestratorState::Stopped;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));
        self.emit_event(OrchestratorEvent::SessionEnded { reason });

        info!("Share stopped");
        Ok(reason)
    }

    /// Startup banner for the running share.
    pub fn banner(&self) -> Banner {
        let url = self.share_url.clone().unwrap_or_default();
        let qr = if self.config.server.show_qr && !url.is_empty() {
            match generate_terminal_qr(&url) {
                Ok(qr) => Some(qr),
                Err(e) => {
                    warn!("Failed to render QR code: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Banner {
            root: self.areas.shared_root().display().to_string(),
            url,
            token_origin: self.token_origin,
            ttl_minutes: self.config.session.ttl_minutes,
            idle_minutes: self.config.session.idle_minutes,
            access_log: self.access_log.path().map(|p| p.display().to_string()),
            allow_list: self
                .allow_list
                .has_restrictions()
                .then(|| self.allow_list.to_string()),
            read_only: self.config.share.read_only,
            qr,
        }
    }

    /// Emits an orchestrator event.
    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }
}
