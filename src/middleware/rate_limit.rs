//! Per-client rate limiting stage.
//!
//! # Algorithm
//!
//! Each client identity owns a token bucket held in a shared
//! [`TokenBucketRegistry`]. Buckets refill continuously at the configured rate
//! (requests per second, fractional rates allowed) up to the burst capacity,
//! and every admitted request consumes one token.
//!
//! # Behavior
//!
//! - Exempt paths (health, readiness) are forwarded without touching the registry
//! - An empty bucket yields a flat `429 Too Many Requests`
//! - No internal fault can deny a request: identity resolution always yields a
//!   key and the registry lookup cannot fail (fail open)
//!
//! # Response Headers
//!
//! On rate limit exceeded (429):
//! - `Retry-After`: Seconds until the next token becomes available (at least 1)
//! - `X-RateLimit-Limit`: Burst capacity per client
//! - `X-RateLimit-Remaining`: Always `0`

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use governor::clock::{Clock, DefaultClock};
use tower::{Layer, Service};
use tracing::warn;

use super::exempt::ExemptPaths;
use super::ip::{ClientIdentity, TrustedProxyConfig};
use super::registry::TokenBucketRegistry;
use crate::metrics;

/// Rate limiting layer for the Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let idle = Duration::from_secs(600);
/// let registry = Arc::new(TokenBucketRegistry::new(0.5, 10, 10_000, idle)?);
/// let layer = RateLimitLayer::new(registry, ExemptPaths::default(), TrustedProxyConfig::default());
/// let app = Router::new().route("/mcp", post(handler)).layer(layer);
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    /// `None` = rate limiting disabled
    registry: Option<Arc<TokenBucketRegistry>>,
    exempt: ExemptPaths,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    pub fn new(
        registry: Arc<TokenBucketRegistry>,
        exempt: ExemptPaths,
        trusted_proxies: TrustedProxyConfig,
    ) -> Self {
        Self {
            registry: Some(registry),
            exempt,
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }

    /// A layer that forwards every request.
    pub fn disabled() -> Self {
        Self {
            registry: None,
            exempt: ExemptPaths::none(),
            trusted_proxies: Arc::new(TrustedProxyConfig::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.registry.is_some()
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            registry: self.registry.clone(),
            exempt: self.exempt.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    registry: Option<Arc<TokenBucketRegistry>>,
    exempt: ExemptPaths,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

/// Outcome of consulting the registry for one request.
enum Admission {
    Allowed,
    Denied { retry_after_secs: u64 },
}

impl<S> RateLimitService<S> {
    fn admit(&self, registry: &TokenBucketRegistry, identity: &ClientIdentity) -> Admission {
        let limiter = registry.acquire(identity.as_str());

        match limiter.check() {
            Ok(()) => Admission::Allowed,
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                // Round up so clients never retry before a token exists.
                let retry_after_secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
                Admission::Denied {
                    retry_after_secs: retry_after_secs.max(1),
                }
            }
        }
    }
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        let Some(registry) = self.registry.as_deref() else {
            return Box::pin(inner.call(req));
        };

        if self.exempt.contains(req.uri().path()) {
            return Box::pin(inner.call(req));
        }

        let identity = ClientIdentity::resolve(&req, &self.trusted_proxies);
        let admission = self.admit(registry, &identity);
        let burst = registry.burst();

        match admission {
            Admission::Allowed => Box::pin(inner.call(req)),
            Admission::Denied { retry_after_secs } => {
                warn!(
                    client_ip = %identity,
                    source = identity.source().as_str(),
                    path = %req.uri().path(),
                    retry_after_secs,
                    "Rate limit exceeded"
                );
                metrics::record_rate_limited();

                Box::pin(async move { Ok(too_many_requests(retry_after_secs, burst)) })
            }
        }
    }
}

/// Build a 429 response with rate limit headers.
fn too_many_requests(retry_after_secs: u64, burst: u32) -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            ("Retry-After", retry_after_secs.to_string()),
            ("X-RateLimit-Limit", burst.to_string()),
            ("X-RateLimit-Remaining", "0".to_string()),
        ],
        "Rate limit exceeded. Please retry later.",
    )
        .into_response()
}
