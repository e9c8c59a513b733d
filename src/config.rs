//! Gateway configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible
//! defaults for development. A `.env` file in the working directory is read
//! first if present.
//!
//! # Security Configuration
//!
//! - `MCP_AUTH_TOKEN`: Shared bearer secret; empty disables authentication
//! - `CORS_ALLOWED_ORIGINS`: Comma-separated list of allowed origins (default: `*` for dev)
//! - `EXEMPT_PATHS`: Paths that skip auth and rate limiting (default: `/health,/ready`)
//! - `TRUSTED_PROXIES`: CIDR ranges whose `X-Forwarded-For` / `X-Real-IP` are believed
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_RPS`: Token refill rate per client, fractional allowed (default: 10, 0 = off)
//! - `RATE_LIMIT_BURST`: Bucket capacity per client (default: 20)
//! - `RATE_LIMIT_MAX_CLIENTS`: Tracked clients before LRU eviction (default: 10000)
//! - `RATE_LIMIT_IDLE_SECS`: Idle time after which a client's bucket is dropped (default: 600).
//!   Must be at least the refill time `RATE_LIMIT_BURST / RATE_LIMIT_RPS`.
//! - `RATE_LIMIT_SWEEP_INTERVAL_SECS`: How often registry housekeeping runs (default: 60)

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::middleware::{CidrRange, DEFAULT_EXEMPT_PATHS, registry};

/// Gateway configuration.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Gateway will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Maximum request body size in bytes (default: 1MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Shared bearer secret. Empty = authentication disabled.
    pub auth_token: String,

    /// Allowed CORS origins. A `*` entry allows every origin.
    pub cors_allowed_origins: Vec<String>,

    /// Paths exempt from auth and rate limiting.
    pub exempt_paths: Vec<String>,

    /// Trusted reverse proxy CIDR ranges.
    ///
    /// Empty = proxy headers are believed from every peer. Only safe when the
    /// gateway is reachable exclusively through a proxy that overwrites them.
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Tokens added per second to each client's bucket (0 = disabled)
    pub rate_limit_rps: f64,

    /// Bucket capacity per client
    pub rate_limit_burst: u32,

    /// Maximum number of clients tracked at once
    pub rate_limit_max_clients: usize,

    /// Buckets idle for longer than this are dropped
    pub rate_limit_idle: Duration,

    /// Interval between registry housekeeping runs
    pub rate_limit_sweep_interval: Duration,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a variable cannot be parsed or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let config = Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: Self::parse_env("PORT", defaults.port)?,
            max_request_body_size: Self::parse_env(
                "MAX_REQUEST_BODY_SIZE",
                defaults.max_request_body_size,
            )?,

            auth_token: env::var("MCP_AUTH_TOKEN").unwrap_or_default(),
            cors_allowed_origins: Self::list_env("CORS_ALLOWED_ORIGINS")
                .unwrap_or(defaults.cors_allowed_origins),
            exempt_paths: Self::list_env("EXEMPT_PATHS")
                .map(|paths| paths.into_iter().filter(|p| p.starts_with('/')).collect())
                .unwrap_or(defaults.exempt_paths),
            trusted_proxies: Self::list_env("TRUSTED_PROXIES").unwrap_or_default(),

            rate_limit_rps: Self::parse_env("RATE_LIMIT_RPS", defaults.rate_limit_rps)?,
            rate_limit_burst: Self::parse_env("RATE_LIMIT_BURST", defaults.rate_limit_burst)?,
            rate_limit_max_clients: Self::parse_env(
                "RATE_LIMIT_MAX_CLIENTS",
                defaults.rate_limit_max_clients,
            )?,
            rate_limit_idle: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_IDLE_SECS",
                defaults.rate_limit_idle.as_secs(),
            )?),
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                defaults.rate_limit_sweep_interval.as_secs(),
            )?),

            metrics_port: Self::parse_env("METRICS_PORT", defaults.metrics_port)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` naming the offending variable.
    pub fn validate(&self) -> AppResult<()> {
        if !self.rate_limit_rps.is_finite() || self.rate_limit_rps < 0.0 {
            return Err(AppError::ConfigError(format!(
                "RATE_LIMIT_RPS must be a non-negative number (got {})",
                self.rate_limit_rps
            )));
        }

        if self.rate_limiting_enabled() {
            let quota = registry::quota_for(self.rate_limit_rps, self.rate_limit_burst)
                .map_err(|e| AppError::ConfigError(format!("RATE_LIMIT_RPS: {e}")))?;

            // A bucket dropped before it refills would come back full.
            let refill = registry::refill_time(&quota);
            if self.rate_limit_idle < refill {
                return Err(AppError::ConfigError(format!(
                    "RATE_LIMIT_IDLE_SECS ({}s) must be at least the bucket refill time \
                     RATE_LIMIT_BURST / RATE_LIMIT_RPS ({:.0}s)",
                    self.rate_limit_idle.as_secs(),
                    refill.as_secs_f64().ceil()
                )));
            }

            if self.rate_limit_max_clients == 0 {
                return Err(AppError::ConfigError(
                    "RATE_LIMIT_MAX_CLIENTS must be greater than 0".to_string(),
                ));
            }

            if self.rate_limit_sweep_interval.is_zero() {
                return Err(AppError::ConfigError(
                    "RATE_LIMIT_SWEEP_INTERVAL_SECS must be greater than 0".to_string(),
                ));
            }
        }

        if let Some(bad) = self
            .trusted_proxies
            .iter()
            .find(|cidr| CidrRange::parse(cidr).is_none())
        {
            return Err(AppError::ConfigError(format!(
                "TRUSTED_PROXIES contains an invalid CIDR range: {bad:?}"
            )));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_rps > 0.0
    }

    pub fn auth_enabled(&self) -> bool {
        !self.auth_token.is_empty()
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Metrics listener address, `None` when metrics are disabled.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Read a comma-separated list variable. `None` if unset.
    fn list_env(name: &str) -> Option<Vec<String>> {
        env::var(name).ok().map(|raw| split_list(&raw))
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Default configuration for testing and development.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_request_body_size: 1024 * 1024, // 1MB
            auth_token: String::new(),
            cors_allowed_origins: vec!["*".to_string()],
            exempt_paths: DEFAULT_EXEMPT_PATHS.iter().map(|p| (*p).to_string()).collect(),
            trusted_proxies: vec![], // Empty = trust all (dev mode)
            rate_limit_rps: 10.0,
            rate_limit_burst: 20,
            rate_limit_max_clients: 10_000,
            rate_limit_idle: Duration::from_secs(600),
            rate_limit_sweep_interval: Duration::from_secs(60),
            metrics_port: 9090,
        }
    }
}
