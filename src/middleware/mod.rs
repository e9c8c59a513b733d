//! HTTP gating middleware for the gateway.
//!
//! - **CORS**: Origin allow-list or wildcard, preflight answered in place
//! - **Bearer Auth**: Single shared secret, constant-time comparison
//! - **Rate Limiting**: Per-client token buckets in a bounded registry
//! - **Client Identity**: Proxy-aware caller resolution with optional trusted CIDRs
//!
//! # Architecture
//!
//! ```text
//! Request → CORS → Auth → Rate Limiter → Handler → Response
//!            ↓       ↓          ↓
//!           204     401        429
//! ```
//!
//! # Failure Policy
//!
//! - Authentication fails **closed**: anything that is not a matching bearer
//!   token is a 401
//! - Rate limiting fails **open**: the registry has no failure path, so a
//!   request is only ever refused for an empty bucket

pub mod auth;
pub mod chain;
pub mod cors;
pub mod exempt;
pub mod ip;
pub mod rate_limit;
pub mod registry;

pub use auth::{AuthRejection, BEARER_SCHEME, BearerAuthLayer, parse_bearer};
pub use chain::MiddlewareChain;
pub use cors::{ANY_ORIGIN, CorsLayer, CorsPolicy};
pub use exempt::{DEFAULT_EXEMPT_PATHS, ExemptPaths};
pub use ip::{CidrRange, ClientIdentity, IdentitySource, TrustedProxyConfig, UNKNOWN_CLIENT};
pub use rate_limit::RateLimitLayer;
pub use registry::{ClientLimiter, RateLimitError, TokenBucketRegistry};
