//! Shared application state for Axum handlers.
//!
//! This module provides thread-safe, clonable state that is shared across
//! all request handlers and the gating chain. It includes:
//!
//! - **Configuration**: Runtime configuration access
//! - **Rate Limit Registry**: Per-client token buckets, shared with the chain
//!
//! The registry expires idle buckets on its own. A background task applies
//! that housekeeping on a fixed interval and publishes the tracked-client
//! gauge.
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken` for proper lifecycle management. Call `shutdown()`
//! to gracefully stop all background tasks before application exit.

use std::sync::Arc;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::error::AppResult;
use crate::metrics;
use crate::middleware::TokenBucketRegistry;

/// Shared application state for Axum handlers.
///
/// # Lifecycle
///
/// The maintenance task is spawned when the state is created (if rate
/// limiting is enabled). Call `shutdown()` before dropping to ensure clean task termination:
///
/// ```rust,ignore
/// let state = AppState::new(config)?;
/// // ... serve ...
/// state.shutdown().await;  // Wait for background tasks to complete
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Per-client limiters. `None` when rate limiting is disabled.
    registry: Option<Arc<TokenBucketRegistry>>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create application state from configuration.
    ///
    /// Must be called from within a Tokio runtime when rate limiting is
    /// enabled, since it spawns the registry maintenance task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the rate limit settings are invalid.
    pub fn new(config: Config) -> AppResult<Self> {
        let registry = if config.rate_limiting_enabled() {
            info!(
                rps = config.rate_limit_rps,
                burst = config.rate_limit_burst,
                max_clients = config.rate_limit_max_clients,
                idle_secs = config.rate_limit_idle.as_secs(),
                trusted_proxies = config.trusted_proxies.len(),
                "Rate limiting enabled"
            );
            Some(Arc::new(TokenBucketRegistry::new(
                config.rate_limit_rps,
                config.rate_limit_burst,
                config.rate_limit_max_clients,
                config.rate_limit_idle,
            )?))
        } else {
            info!("Rate limiting disabled (RATE_LIMIT_RPS=0)");
            None
        };

        let state = Self {
            config: Arc::new(config),
            registry,
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_maintenance_task();

        Ok(state)
    }

    /// The shared limiter registry, if rate limiting is enabled.
    pub fn registry(&self) -> Option<Arc<TokenBucketRegistry>> {
        self.registry.clone()
    }

    /// Number of client identities currently tracked by the rate limiter.
    pub fn tracked_clients(&self) -> usize {
        self.registry.as_ref().map_or(0, |r| r.len())
    }

    /// Whether `shutdown()` has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Spawn the background registry maintenance.
    ///
    /// Only the registry handle is moved into the task, not the whole state.
    fn spawn_maintenance_task(&self) {
        let Some(registry) = self.registry.clone() else {
            return;
        };
        let period = self.config.rate_limit_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased; // Check cancellation first

                    _ = cancel.cancelled() => {
                        debug!("Registry maintenance task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        maintain(&registry);
                    }
                }
            }

            debug!("Registry maintenance task shutting down");
        });
    }

    /// Signal background tasks to stop without waiting for them.
    ///
    /// Readiness reports 503 from this point on.
    pub fn begin_shutdown(&self) {
        self.cancellation_token.cancel();
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// This method:
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.begin_shutdown();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }
}

/// Expire idle limiters and publish the remaining count.
fn maintain(registry: &TokenBucketRegistry) -> usize {
    let tracked = registry.len();
    metrics::set_rate_limit_clients(tracked);
    trace!(tracked, "Rate limiter registry maintained");
    tracked
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_disabled_rate_limiting_has_no_registry() {
        let state = AppState::new(Config {
            rate_limit_rps: 0.0,
            ..Config::default()
        })
        .unwrap();

        assert!(state.registry().is_none());
        assert_eq!(state.tracked_clients(), 0);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_registry_is_shared() {
        let state = AppState::new(Config::default()).unwrap();
        let registry = state.registry().unwrap();

        registry.acquire("10.0.0.1");
        assert_eq!(state.clone().tracked_clients(), 1);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_marks_not_ready() {
        let state = AppState::new(Config::default()).unwrap();
        assert!(!state.is_shutting_down());

        state.shutdown().await;
        assert!(state.is_shutting_down());
    }

    #[tokio::test]
    async fn test_idle_clients_expire() {
        let state = AppState::new(Config {
            // Refills in 1ms, so the idle threshold is not raised.
            rate_limit_rps: 1000.0,
            rate_limit_burst: 1,
            rate_limit_idle: Duration::from_millis(10),
            rate_limit_sweep_interval: Duration::from_millis(20),
            ..Config::default()
        })
        .unwrap();
        state.registry().unwrap().acquire("10.0.0.1");

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(state.tracked_clients(), 0);
        state.shutdown().await;
    }

    #[test]
    fn test_maintain_keeps_recent_clients() {
        let registry = TokenBucketRegistry::new(10.0, 5, 100, Duration::from_secs(60)).unwrap();
        registry.acquire("a");

        assert_eq!(maintain(&registry), 1);
        assert!(registry.contains("a"));
    }
}
