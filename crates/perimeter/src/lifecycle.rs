//! Session lifetime supervision.
//!
//! A share lives for at most its TTL, measured from startup, and ends early
//! when no authenticated request has been seen for the idle budget. Either
//! condition, or an external request such as Ctrl+C, moves the session from
//! `Running` to `Stopping(reason)` exactly once and cancels the shutdown
//! token the server is waiting on.
//!
//! ```text
//!   Running ──ttl timer──────────▶ Stopping(TtlExpired) ──mark_stopped──▶ Stopped
//!      │    ──idle check─────────▶ Stopping(IdleTimeout)
//!      └────request_shutdown(r)──▶ Stopping(r)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How often the idle budget is checked unless configured otherwise.
pub const DEFAULT_IDLE_CHECK_PERIOD: Duration = Duration::from_secs(60);

const NO_REASON: u8 = 0;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StopReason {
    /// The absolute lifetime ran out.
    TtlExpired = 1,
    /// No activity within the idle budget.
    IdleTimeout = 2,
    /// The operator interrupted the process.
    UserInterrupt = 3,
    /// The server failed.
    Error = 4,
}

impl StopReason {
    /// Human-readable description for the console.
    pub fn description(&self) -> &'static str {
        match self {
            StopReason::TtlExpired => "TTL expired",
            StopReason::IdleTimeout => "Idle timeout",
            StopReason::UserInterrupt => "User interrupt (Ctrl+C)",
            StopReason::Error => "Error",
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(StopReason::TtlExpired),
            2 => Some(StopReason::IdleTimeout),
            3 => Some(StopReason::UserInterrupt),
            4 => Some(StopReason::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Observable state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Serving requests.
    Running,
    /// A stop was requested; the server is draining.
    Stopping(StopReason),
    /// The server has finished draining.
    Stopped(StopReason),
}

/// Clock and stop state shared by the timers and every request handler.
#[derive(Debug)]
pub struct SessionLifecycle {
    started: Instant,
    ttl: Duration,
    idle: Duration,
    idle_check_period: Duration,
    /// Milliseconds after `started` of the latest recorded activity.
    last_activity_ms: AtomicU64,
    stop_reason: AtomicU8,
    stopped: AtomicBool,
    shutdown: CancellationToken,
}

impl SessionLifecycle {
    /// Start a session clock now.
    ///
    /// A zero `ttl` or `idle` disables that limit.
    pub fn new(ttl: Duration, idle: Duration) -> Self {
        Self {
            started: Instant::now(),
            ttl,
            idle,
            idle_check_period: DEFAULT_IDLE_CHECK_PERIOD,
            last_activity_ms: AtomicU64::new(0),
            stop_reason: AtomicU8::new(NO_REASON),
            stopped: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Override how often the idle budget is checked.
    pub fn with_idle_check_period(mut self, period: Duration) -> Self {
        if !period.is_zero() {
            self.idle_check_period = period;
        }
        self
    }

    /// Configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Configured idle budget.
    pub fn idle_budget(&self) -> Duration {
        self.idle
    }

    /// Note that an authenticated request arrived. Does not extend the TTL.
    pub fn record_activity(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(now, Ordering::Relaxed);
    }

    /// Time since the last recorded activity (or since start).
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    /// Request the transition to `Stopping(reason)`.
    ///
    /// Only the first request wins and returns `true`; later calls leave the
    /// recorded reason untouched.
    pub fn request_shutdown(&self, reason: StopReason) -> bool {
        let won = self
            .stop_reason
            .compare_exchange(NO_REASON, reason as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if won {
            info!(
                reason = reason.description(),
                uptime_secs = self.uptime_secs(),
                "Session stopping"
            );
            self.shutdown.cancel();
        } else {
            debug!(?reason, "Ignoring shutdown request, session already stopping");
        }
        won
    }

    /// The recorded stop reason, if any.
    pub fn stop_reason(&self) -> Option<StopReason> {
        StopReason::from_u8(self.stop_reason.load(Ordering::Acquire))
    }

    /// Move `Stopping` to `Stopped` once the server has drained.
    ///
    /// Returns `false` if no stop was requested.
    pub fn mark_stopped(&self) -> bool {
        if self.stop_reason().is_none() {
            return false;
        }
        self.stopped.store(true, Ordering::Release);
        true
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        match self.stop_reason() {
            None => LifecycleState::Running,
            Some(reason) if self.stopped.load(Ordering::Acquire) => LifecycleState::Stopped(reason),
            Some(reason) => LifecycleState::Stopping(reason),
        }
    }

    /// Whether the session is still serving.
    pub fn is_running(&self) -> bool {
        self.stop_reason().is_none()
    }

    /// Whole minutes of TTL left, never negative. Zero when the TTL is disabled.
    pub fn remaining_ttl_minutes(&self) -> u64 {
        let ttl_minutes = self.ttl.as_secs() / 60;
        let elapsed_minutes = self.started.elapsed().as_secs() / 60;
        ttl_minutes.saturating_sub(elapsed_minutes)
    }

    /// Whole seconds since start.
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Token cancelled when the session starts stopping.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wait until the session starts stopping.
    pub async fn stopping(&self) {
        self.shutdown.cancelled().await
    }

    /// Spawn the TTL and idle timers on the current runtime.
    pub fn spawn_timers(self: &Arc<Self>) -> LifecycleTimers {
        let mut handles = Vec::with_capacity(2);

        if !self.ttl.is_zero() {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                // A TTL past the clock's range never expires on its own.
                let Some(deadline) = this.started.checked_add(this.ttl) else {
                    debug!(ttl_secs = this.ttl.as_secs(), "TTL exceeds clock range, timer disabled");
                    this.shutdown.cancelled().await;
                    return;
                };
                tokio::select! {
                    _ = this.shutdown.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        this.request_shutdown(StopReason::TtlExpired);
                    }
                }
            }));
        }

        if !self.idle.is_zero() {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let period = this.idle_check_period;
                let mut ticker = tokio::time::interval_at(this.started + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = this.shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            if this.idle_for() >= this.idle {
                                this.request_shutdown(StopReason::IdleTimeout);
                                break;
                            }
                        }
                    }
                }
            }));
        }

        LifecycleTimers { handles }
    }
}

/// Handles of the running timer tasks; aborted when dropped.
#[derive(Debug)]
pub struct LifecycleTimers {
    handles: Vec<JoinHandle<()>>,
}

impl LifecycleTimers {
    /// Number of active timers.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether both limits are disabled.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Drop for LifecycleTimers {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_initial_state() {
        let lifecycle = SessionLifecycle::new(60 * MINUTE, 30 * MINUTE);
        assert_eq!(lifecycle.state(), LifecycleState::Running);
        assert!(lifecycle.is_running());
        assert_eq!(lifecycle.stop_reason(), None);
        assert!(!lifecycle.shutdown_token().is_cancelled());
    }

    #[test]
    fn test_first_reason_wins() {
        let lifecycle = SessionLifecycle::new(60 * MINUTE, 30 * MINUTE);
        assert!(lifecycle.request_shutdown(StopReason::UserInterrupt));
        assert!(!lifecycle.request_shutdown(StopReason::Error));
        assert!(!lifecycle.request_shutdown(StopReason::TtlExpired));
        assert_eq!(
            lifecycle.state(),
            LifecycleState::Stopping(StopReason::UserInterrupt)
        );
        assert!(lifecycle.shutdown_token().is_cancelled());
    }

    #[test]
    fn test_mark_stopped() {
        let lifecycle = SessionLifecycle::new(60 * MINUTE, 30 * MINUTE);
        assert!(!lifecycle.mark_stopped());
        assert_eq!(lifecycle.state(), LifecycleState::Running);

        lifecycle.request_shutdown(StopReason::Error);
        assert!(lifecycle.mark_stopped());
        assert_eq!(lifecycle.state(), LifecycleState::Stopped(StopReason::Error));
    }

    #[test]
    fn test_concurrent_requests_single_winner() {
        let lifecycle = Arc::new(SessionLifecycle::new(60 * MINUTE, 30 * MINUTE));
        let reasons = [
            StopReason::TtlExpired,
            StopReason::IdleTimeout,
            StopReason::UserInterrupt,
            StopReason::Error,
        ];

        let threads: Vec<_> = (0..32)
            .map(|i| {
                let lifecycle = Arc::clone(&lifecycle);
                let reason = reasons[i % reasons.len()];
                std::thread::spawn(move || (reason, lifecycle.request_shutdown(reason)))
            })
            .collect();

        let results: Vec<(StopReason, bool)> =
            threads.into_iter().map(|t| t.join().unwrap()).collect();
        let winners: Vec<_> = results.iter().filter(|(_, won)| *won).collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(lifecycle.stop_reason(), Some(winners[0].0));
    }

    #[test]
    fn test_reason_descriptions() {
        assert_eq!(StopReason::TtlExpired.description(), "TTL expired");
        assert_eq!(StopReason::IdleTimeout.description(), "Idle timeout");
        assert_eq!(
            StopReason::UserInterrupt.description(),
            "User interrupt (Ctrl+C)"
        );
        assert_eq!(StopReason::Error.to_string(), "Error");
    }

    #[test]
    fn test_reason_serializes_snake_case() {
        let json = serde_json::to_string(&StopReason::IdleTimeout).unwrap();
        assert_eq!(json, "\"idle_timeout\"");
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_ttl_counts_down() {
        let lifecycle = SessionLifecycle::new(60 * MINUTE, 30 * MINUTE);
        assert_eq!(lifecycle.remaining_ttl_minutes(), 60);

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(lifecycle.remaining_ttl_minutes(), 59);
        assert_eq!(lifecycle.uptime_secs(), 90);

        tokio::time::advance(61 * MINUTE).await;
        assert_eq!(lifecycle.remaining_ttl_minutes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_fires_once() {
        let lifecycle = Arc::new(SessionLifecycle::new(MINUTE, 60 * MINUTE));
        let timers = lifecycle.spawn_timers();
        assert_eq!(timers.len(), 2);

        let token = lifecycle.shutdown_token();
        tokio::time::timeout(2 * MINUTE, token.cancelled())
            .await
            .expect("ttl timer should fire");

        assert_eq!(
            lifecycle.state(),
            LifecycleState::Stopping(StopReason::TtlExpired)
        );
        assert_eq!(lifecycle.uptime_secs(), 60);

        let late: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = Arc::clone(&lifecycle);
                tokio::spawn(async move { lifecycle.request_shutdown(StopReason::UserInterrupt) })
            })
            .collect();
        for handle in late {
            assert!(!handle.await.unwrap());
        }
        assert_eq!(lifecycle.stop_reason(), Some(StopReason::TtlExpired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_races_external_requests() {
        let lifecycle = Arc::new(SessionLifecycle::new(MINUTE, 60 * MINUTE));
        let _timers = lifecycle.spawn_timers();
        let reasons = [
            StopReason::UserInterrupt,
            StopReason::IdleTimeout,
            StopReason::Error,
        ];

        // Requests land on the same tick as the TTL deadline.
        let racers: Vec<_> = (0..9)
            .map(|i| {
                let lifecycle = Arc::clone(&lifecycle);
                let reason = reasons[i % reasons.len()];
                tokio::spawn(async move {
                    tokio::time::sleep(MINUTE).await;
                    (reason, lifecycle.request_shutdown(reason))
                })
            })
            .collect();

        let mut winners = Vec::new();
        for racer in racers {
            let (reason, won) = racer.await.unwrap();
            if won {
                winners.push(reason);
            }
        }
        lifecycle.stopping().await;

        let recorded = lifecycle.stop_reason().unwrap();
        if recorded == StopReason::TtlExpired {
            assert!(winners.is_empty());
        } else {
            assert_eq!(winners, vec![recorded]);
        }
        assert_eq!(lifecycle.state(), LifecycleState::Stopping(recorded));
        assert_eq!(lifecycle.uptime_secs(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_beyond_clock_range_keeps_running() {
        let ttl = Duration::from_secs(u64::MAX / 2);
        let lifecycle = Arc::new(SessionLifecycle::new(ttl, Duration::ZERO));
        let timers = lifecycle.spawn_timers();
        assert_eq!(timers.len(), 1);

        tokio::time::sleep(24 * 60 * MINUTE).await;
        assert!(lifecycle.is_running());
        assert!(timers.handles.iter().all(|handle| !handle.is_finished()));
        assert_eq!(lifecycle.remaining_ttl_minutes(), ttl.as_secs() / 60 - 24 * 60);

        assert!(lifecycle.request_shutdown(StopReason::UserInterrupt));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(timers.handles.iter().all(|handle| handle.is_finished()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_does_not_extend_ttl() {
        let lifecycle = Arc::new(SessionLifecycle::new(2 * MINUTE, 60 * MINUTE));
        let _timers = lifecycle.spawn_timers();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(30)).await;
            lifecycle.record_activity();
        }
        assert!(lifecycle.is_running());

        lifecycle.stopping().await;
        assert_eq!(lifecycle.stop_reason(), Some(StopReason::TtlExpired));
        assert_eq!(lifecycle.uptime_secs(), 120);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_fires_after_last_activity() {
        let lifecycle = Arc::new(SessionLifecycle::new(Duration::ZERO, 5 * MINUTE));
        let timers = lifecycle.spawn_timers();
        assert_eq!(timers.len(), 1);

        tokio::time::sleep(3 * MINUTE).await;
        lifecycle.record_activity();

        lifecycle.stopping().await;
        assert_eq!(lifecycle.stop_reason(), Some(StopReason::IdleTimeout));
        assert_eq!(lifecycle.uptime_secs(), 8 * 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_for_tracks_activity() {
        let lifecycle = SessionLifecycle::new(60 * MINUTE, 30 * MINUTE);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(lifecycle.idle_for(), Duration::from_secs(10));
        lifecycle.record_activity();
        assert_eq!(lifecycle.idle_for(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_limits_spawn_nothing() {
        let lifecycle = Arc::new(SessionLifecycle::new(Duration::ZERO, Duration::ZERO));
        let timers = lifecycle.spawn_timers();
        assert!(timers.is_empty());
        tokio::time::advance(24 * 60 * MINUTE).await;
        assert!(lifecycle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_request_stops_timers() {
        let lifecycle = Arc::new(SessionLifecycle::new(MINUTE, MINUTE));
        let _timers = lifecycle.spawn_timers();
        assert!(lifecycle.request_shutdown(StopReason::UserInterrupt));

        tokio::time::sleep(5 * MINUTE).await;
        assert_eq!(lifecycle.stop_reason(), Some(StopReason::UserInterrupt));
    }
}
