//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Reuses or generates X-Request-Id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← 204 for preflight
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Bearer Auth     │ ← 401 if invalid (bypassed for exempt paths)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (bypassed for exempt paths)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Body Limit     │ ← 413 if too large
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! # Routes
//!
//! - `/health`, `/ready` - Health & monitoring (exempt by default)
//! - `/mcp` - JSON-RPC endpoint

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderName;
use axum::routing::{get, post};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::MiddlewareChain;
use crate::state::AppState;

/// Header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the application router with all routes and middleware configured.
///
/// # Middleware Configuration
///
/// - **Rate Limiting**: Enabled if `rate_limit_rps > 0`, sharing the state's registry
/// - **Authentication**: Enabled if `auth_token` is set
/// - **CORS**: Configured from `cors_allowed_origins`
///
/// The rate limiter reads the peer address from `ConnectInfo<SocketAddr>`,
/// so serve the router with `into_make_service_with_connect_info`.
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();
    let chain = MiddlewareChain::from_config(&config, state.registry());

    if chain.auth_enabled() {
        info!("Bearer authentication enabled");
    } else {
        info!("Bearer authentication disabled (no MCP_AUTH_TOKEN set)");
    }
    info!(policy = ?chain.cors_policy(), "CORS configured");
    info!(
        max_size_mb = config.max_request_body_size / (1024 * 1024),
        "Request body size limit configured"
    );

    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

    // Applied bottom to top: the last layer added runs first.
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/mcp", post(handlers::handle_rpc))
        .layer(DefaultBodyLimit::max(config.max_request_body_size))
        .layer(chain)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state)
}
