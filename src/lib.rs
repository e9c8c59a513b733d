//! # MCP Gateway
//!
//! The HTTP gating layer in front of an MCP (Model Context Protocol) server,
//! built on Axum and Tower:
//!
//! - **CORS**: Allow-list or wildcard origins, preflights answered in place
//! - **Authentication**: Optional shared-secret bearer token
//! - **Rate Limiting**: Per-client token buckets with a bounded, swept registry
//! - **Observability**: Request IDs, structured logging, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Request ID → Trace                                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  MiddlewareChain (CORS → Bearer Auth → Rate Limit)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, ready, JSON-RPC)                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//! use mcp_gateway::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config.clone())?;
//!     let app = build_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind(config.server_addr()).await?;
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! Require a bearer token:
//! ```bash
//! MCP_AUTH_TOKEN=your-secret cargo run
//! ```
//!
//! Tune rate limiting:
//! ```bash
//! RATE_LIMIT_RPS=0.5 RATE_LIMIT_BURST=5 cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use middleware::{ClientIdentity, MiddlewareChain, TokenBucketRegistry};
pub use routes::build_router;
pub use state::AppState;
