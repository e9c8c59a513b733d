use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Application version
    pub version: String,
    /// Timestamp of the health check
    pub timestamp: DateTime<Utc>,
    /// Client identities currently tracked by the rate limiter
    pub rate_limited_clients: usize,
}
