//! Composition of the gateway's gating stages.
//!
//! ```text
//! Request → CORS → Bearer Auth → Rate Limit → protocol handler
//!             ↓          ↓            ↓
//!        204 preflight  401         429
//! ```
//!
//! The order is fixed. Each stage may answer the request itself, in which case
//! the stages after it never run.

use std::sync::Arc;

use tower::Layer;

use super::auth::{BearerAuthLayer, BearerAuthService};
use super::cors::{CorsLayer, CorsPolicy, CorsService};
use super::exempt::ExemptPaths;
use super::ip::TrustedProxyConfig;
use super::rate_limit::{RateLimitLayer, RateLimitService};
use super::registry::TokenBucketRegistry;
use crate::config::Config;

/// The complete gating chain as a single Tower layer.
///
/// Every stage is an explicit object, so independently configured chains can
/// coexist in one process (each with its own registry).
#[derive(Clone)]
pub struct MiddlewareChain {
    cors: CorsLayer,
    auth: BearerAuthLayer,
    rate_limit: RateLimitLayer,
}

impl MiddlewareChain {
    pub fn new(cors: CorsLayer, auth: BearerAuthLayer, rate_limit: RateLimitLayer) -> Self {
        Self {
            cors,
            auth,
            rate_limit,
        }
    }

    /// Build the chain described by `config`, sharing `registry` with the caller.
    ///
    /// `registry` is `None` when rate limiting is disabled.
    pub fn from_config(config: &Config, registry: Option<Arc<TokenBucketRegistry>>) -> Self {
        let exempt = ExemptPaths::new(config.exempt_paths.iter().cloned());

        let rate_limit = match registry {
            Some(registry) => RateLimitLayer::new(
                registry,
                exempt.clone(),
                TrustedProxyConfig::new(&config.trusted_proxies),
            ),
            None => RateLimitLayer::disabled(),
        };

        Self::new(
            CorsLayer::new(CorsPolicy::from_origins(&config.cors_allowed_origins)),
            BearerAuthLayer::new(&config.auth_token, exempt),
            rate_limit,
        )
    }

    pub fn auth_enabled(&self) -> bool {
        self.auth.is_enabled()
    }

    pub fn rate_limit_enabled(&self) -> bool {
        self.rate_limit.is_enabled()
    }

    pub fn cors_policy(&self) -> &CorsPolicy {
        self.cors.policy()
    }
}

impl<S> Layer<S> for MiddlewareChain {
    type Service = CorsService<BearerAuthService<RateLimitService<S>>>;

    fn layer(&self, inner: S) -> Self::Service {
        self.cors
            .layer(self.auth.layer(self.rate_limit.layer(inner)))
    }
}
