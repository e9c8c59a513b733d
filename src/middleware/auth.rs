//! Shared-secret bearer token authentication.
//!
//! # Security Features
//!
//! - **Constant-time comparison**: the token is compared with `subtle`
//! - **Fail closed**: a missing, malformed or non-UTF-8 `Authorization` header is a 401
//! - **Selective protection**: exempt paths (health, readiness) are never checked
//!
//! # Usage
//!
//! ```bash
//! MCP_AUTH_TOKEN=your-secret cargo run
//! curl -H "Authorization: Bearer your-secret" -d '{"jsonrpc":"2.0","id":1,"method":"ping"}' \
//!      http://localhost:3000/mcp
//! ```
//!
//! The scheme keyword is matched case-insensitively (`bearer`, `BEARER` and
//! `Bearer` are all accepted); the token itself must match exactly.
//!
//! An empty secret disables the stage entirely. This is a single-tenant gate:
//! callers that supply their own upstream credentials are handled further in.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use subtle::ConstantTimeEq;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::exempt::ExemptPaths;
use crate::metrics;

/// Authentication scheme keyword.
pub const BEARER_SCHEME: &str = "Bearer";

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    Missing,
    Malformed,
    InvalidToken,
}

impl AuthRejection {
    fn reason(self) -> &'static str {
        match self {
            AuthRejection::Missing => "Missing bearer token",
            AuthRejection::Malformed => "Malformed Authorization header",
            AuthRejection::InvalidToken => "Invalid bearer token",
        }
    }

    fn label(self) -> &'static str {
        match self {
            AuthRejection::Missing => "missing",
            AuthRejection::Malformed => "malformed",
            AuthRejection::InvalidToken => "invalid",
        }
    }
}

/// Extract the token from an `Authorization` header value.
///
/// Returns `None` unless the value is `<scheme> <token>` with a scheme equal
/// to `Bearer` ignoring ASCII case and a non-empty token.
pub fn parse_bearer(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        return None;
    }
    let token = token.trim_start();
    (!token.is_empty()).then_some(token)
}

/// Validate the request's credential against `secret`.
fn authenticate<B>(req: &Request<B>, secret: &str) -> Result<(), AuthRejection> {
    let value = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(AuthRejection::Missing)?;
    let value = value.to_str().map_err(|_| AuthRejection::Malformed)?;
    let token = parse_bearer(value).ok_or(AuthRejection::Malformed)?;

    if constant_time_eq(token, secret) {
        Ok(())
    } else {
        Err(AuthRejection::InvalidToken)
    }
}

/// Length differences are not hidden, only the position of the first mismatch.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Bearer authentication layer.
///
/// When the secret is empty, all requests are allowed (auth disabled).
#[derive(Clone)]
pub struct BearerAuthLayer {
    /// `None` = auth disabled
    secret: Option<Arc<str>>,
    exempt: ExemptPaths,
}

impl BearerAuthLayer {
    /// Create a bearer auth layer. An empty `secret` disables authentication.
    pub fn new(secret: &str, exempt: ExemptPaths) -> Self {
        Self {
            secret: (!secret.is_empty()).then(|| Arc::from(secret)),
            exempt,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthService {
            inner,
            secret: self.secret.clone(),
            exempt: self.exempt.clone(),
        }
    }
}

/// Bearer authentication service wrapper.
#[derive(Clone)]
pub struct BearerAuthService<S> {
    inner: S,
    secret: Option<Arc<str>>,
    exempt: ExemptPaths,
}

impl<S> Service<Request<Body>> for BearerAuthService<S>
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

        let Some(secret) = self.secret.as_deref() else {
            return Box::pin(inner.call(req));
        };

        let path = req.uri().path();
        if self.exempt.contains(path) {
            debug!(path, "Bypassing auth for exempt path");
            return Box::pin(inner.call(req));
        }

        match authenticate(&req, secret) {
            Ok(()) => {
                debug!("Bearer authentication successful");
                Box::pin(inner.call(req))
            }
            Err(rejection) => {
                warn!(
                    path = %req.uri().path(),
                    reason = rejection.label(),
                    "Rejected unauthenticated request"
                );
                metrics::record_auth_rejection(rejection.label());
                Box::pin(async move { Ok(unauthorized_response(rejection)) })
            }
        }
    }
}

/// Build a 401 response with a short plain-text reason.
fn unauthorized_response(rejection: AuthRejection) -> Response<Body> {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, BEARER_SCHEME)],
        rejection.reason(),
    )
        .into_response()
}
