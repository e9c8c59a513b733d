//! Health and readiness endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness with rate limiter occupancy
//! - `GET /ready` - Readiness probe, 503 once shutdown has begun
//!
//! Both paths are exempt from authentication and rate limiting by default.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::instrument;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint.
///
/// Always returns 200 OK.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "timestamp": "2024-01-15T10:30:00Z",
///   "rate_limited_clients": 12
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        rate_limited_clients: state.tracked_clients(),
    })
}

/// Readiness check endpoint for Kubernetes probes.
///
/// Returns 200 OK while serving, 503 Service Unavailable after shutdown
/// has started so load balancers drain the instance.
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    if state.is_shutting_down() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}
