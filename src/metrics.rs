//! Prometheus metrics for gateway observability.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `mcp_gateway_auth_rejections_total` - Requests rejected by bearer auth (label: reason)
//! - `mcp_gateway_rate_limited_total` - Requests rejected with 429
//! - `mcp_gateway_cors_preflights_total` - Preflight requests answered
//! - `mcp_gateway_rpc_calls_total` - JSON-RPC calls handled (labels: method, outcome)
//!
//! ## Histograms
//! - `mcp_gateway_rpc_duration_seconds` - JSON-RPC handling duration (label: method)
//!
//! ## Gauges
//! - `mcp_gateway_rate_limit_clients` - Client identities currently tracked by the limiter
//!
//! # Usage
//!
//! ```rust,ignore
//! use mcp_gateway::metrics::{try_init_metrics, record_rate_limited};
//!
//! // Initialize metrics (call once at startup)
//! try_init_metrics("0.0.0.0:9090".parse()?);
//!
//! // Record from middleware
//! record_rate_limited();
//! ```
//!
//! Recording without an installed exporter is a no-op.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const AUTH_REJECTIONS_TOTAL: &str = "mcp_gateway_auth_rejections_total";
    pub const RATE_LIMITED_TOTAL: &str = "mcp_gateway_rate_limited_total";
    pub const CORS_PREFLIGHTS_TOTAL: &str = "mcp_gateway_cors_preflights_total";
    pub const RPC_CALLS_TOTAL: &str = "mcp_gateway_rpc_calls_total";
    pub const RPC_DURATION_SECONDS: &str = "mcp_gateway_rpc_duration_seconds";
    pub const RATE_LIMIT_CLIENTS: &str = "mcp_gateway_rate_limit_clients";
}

/// Initialize the Prometheus metrics exporter.
///
/// Sets up metric descriptions and starts the Prometheus HTTP listener on
/// `metrics_addr`.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::AUTH_REJECTIONS_TOTAL,
        "Total number of requests rejected by bearer authentication"
    );
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::CORS_PREFLIGHTS_TOTAL,
        "Total number of CORS preflight requests answered"
    );
    describe_counter!(names::RPC_CALLS_TOTAL, "Total number of JSON-RPC calls handled");

    describe_histogram!(
        names::RPC_DURATION_SECONDS,
        "JSON-RPC call handling duration in seconds"
    );

    describe_gauge!(
        names::RATE_LIMIT_CLIENTS,
        "Number of client identities tracked by the rate limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counter Recording Functions
// =============================================================================

/// Record a request rejected by bearer authentication.
pub fn record_auth_rejection(reason: &'static str) {
    counter!(names::AUTH_REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

/// Record a request rejected with 429.
pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

/// Record an answered CORS preflight.
pub fn record_preflight() {
    counter!(names::CORS_PREFLIGHTS_TOTAL).increment(1);
}

/// Record a handled JSON-RPC call.
pub fn record_rpc_call(method: &str, outcome: &'static str) {
    counter!(names::RPC_CALLS_TOTAL, "method" => method.to_string(), "outcome" => outcome)
        .increment(1);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

/// Record JSON-RPC handling duration.
pub fn record_rpc_duration(method: &str, duration_secs: f64) {
    histogram!(names::RPC_DURATION_SECONDS, "method" => method.to_string()).record(duration_secs);
}

// =============================================================================
// Gauge Recording Functions
// =============================================================================

/// Update the tracked client count gauge.
pub fn set_rate_limit_clients(count: usize) {
    gauge!(names::RATE_LIMIT_CLIENTS).set(count as f64);
}
