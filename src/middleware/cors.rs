//! CORS policy enforcement and preflight handling.
//!
//! # Behavior
//!
//! | Request | Result |
//! |---|---|
//! | no `Origin` | forwarded untouched, no CORS headers |
//! | `Origin`, wildcard policy | forwarded, `Access-Control-Allow-Origin: *` |
//! | `Origin` on the allow-list | forwarded, origin echoed back with `Vary: Origin` |
//! | `Origin` not on the allow-list | forwarded, no CORS headers (the browser blocks it) |
//! | `OPTIONS` with `Origin` | answered here with `204`, inner service never called |
//!
//! Matching is exact string comparison; there is no pattern or subdomain
//! matching. An empty allow-list with no wildcard denies every cross-origin
//! caller.
//!
//! This stage sits outermost in the gateway chain so that preflights, which
//! browsers send without credentials, are answered before authentication or
//! rate limiting can reject them.

use std::collections::HashSet;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Method, Request, Response, StatusCode};
use tower::{Layer, Service};
use tracing::{debug, trace};

use crate::metrics;

/// Sentinel allow-list entry meaning "any origin".
pub const ANY_ORIGIN: &str = "*";

/// Methods advertised to preflight requests.
pub const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";

/// Request headers advertised to preflight requests.
pub const ALLOWED_HEADERS: &str =
    "Authorization, Content-Type, Accept, Mcp-Session-Id, Mcp-Protocol-Version, X-Request-Id";

/// How long browsers may cache a preflight answer, in seconds.
pub const PREFLIGHT_MAX_AGE_SECS: &str = "600";

/// Which origins may call the gateway from a browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsPolicy {
    AllowAll,
    AllowList(HashSet<String>),
}

impl CorsPolicy {
    /// Build from configured origins. Any `*` entry makes the policy wildcard.
    pub fn from_origins(origins: &[String]) -> Self {
        if origins.iter().any(|o| o == ANY_ORIGIN) {
            return CorsPolicy::AllowAll;
        }
        CorsPolicy::AllowList(origins.iter().cloned().collect())
    }

    /// Value for `Access-Control-Allow-Origin`, if the origin is allowed.
    pub fn allow_origin(&self, origin: &HeaderValue) -> Option<HeaderValue> {
        match self {
            CorsPolicy::AllowAll => Some(HeaderValue::from_static(ANY_ORIGIN)),
            CorsPolicy::AllowList(allowed) => origin
                .to_str()
                .ok()
                .filter(|o| allowed.contains(*o))
                .map(|_| origin.clone()),
        }
    }
}

/// CORS layer for the Tower middleware stack.
#[derive(Clone)]
pub struct CorsLayer {
    policy: Arc<CorsPolicy>,
}

impl CorsLayer {
    pub fn new(policy: CorsPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    pub fn from_origins(origins: &[String]) -> Self {
        Self::new(CorsPolicy::from_origins(origins))
    }

    pub fn policy(&self) -> &CorsPolicy {
        &self.policy
    }
}

impl<S> Layer<S> for CorsLayer {
    type Service = CorsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorsService {
            inner,
            policy: self.policy.clone(),
        }
    }
}

/// CORS service wrapper.
#[derive(Clone)]
pub struct CorsService<S> {
    inner: S,
    policy: Arc<CorsPolicy>,
}

impl<S> Service<Request<Body>> for CorsService<S>
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

        // Not a cross-origin request.
        let Some(origin) = req.headers().get(header::ORIGIN).cloned() else {
            return Box::pin(inner.call(req));
        };

        let allow_origin = self.policy.allow_origin(&origin);
        if allow_origin.is_none() {
            debug!(origin = ?origin, "Origin not in CORS allow-list");
        }

        if req.method() == Method::OPTIONS {
            trace!(origin = ?origin, path = %req.uri().path(), "Answering CORS preflight");
            metrics::record_preflight();
            return Box::pin(async move { Ok(preflight_response(allow_origin)) });
        }

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            if let Some(value) = allow_origin {
                apply_allow_origin(response.headers_mut(), value);
            }
            Ok(response)
        })
    }
}

fn apply_allow_origin(headers: &mut HeaderMap, value: HeaderValue) {
    if value != ANY_ORIGIN {
        // Echoed origins make the response origin-dependent for caches.
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
}

/// Build the 204 answer to a preflight request.
fn preflight_response(allow_origin: Option<HeaderValue>) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE_SECS),
    );
    if let Some(value) = allow_origin {
        apply_allow_origin(headers, value);
    }

    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    async fn ok_handler(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
        Ok(Response::new(Body::from("inner")))
    }

    fn allow_list(origins: &[&str]) -> CorsLayer {
        let origins: Vec<String> = origins.iter().map(|o| (*o).to_string()).collect();
        CorsLayer::from_origins(&origins)
    }

    fn request(method: Method, origin: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri("/mcp");
        if let Some(origin) = origin {
            builder = builder.header("origin", origin);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn call(layer: &CorsLayer, req: Request<Body>) -> Response<Body> {
        layer
            .layer(tower::service_fn(ok_handler))
            .oneshot(req)
            .await
            .unwrap()
    }

    #[test]
    fn test_policy_from_origins() {
        assert_eq!(
            CorsPolicy::from_origins(&["https://a.com".to_string(), "*".to_string()]),
            CorsPolicy::AllowAll
        );
        assert!(matches!(
            CorsPolicy::from_origins(&[]),
            CorsPolicy::AllowList(ref list) if list.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_no_origin_no_cors_headers() {
        let res = call(&allow_list(&["*"]), request(Method::POST, None)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(!res.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_wildcard_allows_any_origin() {
        let res = call(
            &allow_list(&["*"]),
            request(Method::POST, Some("http://anything.example")),
        )
        .await;
        assert_eq!(res.headers()["access-control-allow-origin"], "*");
        assert!(!res.headers().contains_key("vary"));
    }

    #[tokio::test]
    async fn test_exact_match_is_echoed() {
        let layer = allow_list(&["http://allowed.com"]);

        let res = call(&layer, request(Method::POST, Some("http://allowed.com"))).await;
        assert_eq!(
            res.headers()["access-control-allow-origin"],
            "http://allowed.com"
        );
        assert_eq!(res.headers()["vary"], "Origin");

        let res = call(&layer, request(Method::POST, Some("http://other.com"))).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(!res.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_empty_allow_list_denies_all_origins() {
        let res = call(&allow_list(&[]), request(Method::POST, Some("http://a.com"))).await;
        assert!(!res.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_preflight_short_circuits() {
        let reached = Arc::new(AtomicBool::new(false));
        let flag = reached.clone();
        let svc = allow_list(&["http://allowed.com"]).layer(tower::service_fn(
            move |_req: Request<Body>| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok::<_, Infallible>(Response::new(Body::empty()))
                }
            },
        ));

        let res = svc
            .oneshot(request(Method::OPTIONS, Some("http://allowed.com")))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            res.headers()["access-control-allow-methods"],
            "GET, POST, OPTIONS"
        );
        assert!(res.headers().contains_key("access-control-allow-headers"));
        assert_eq!(
            res.headers()["access-control-allow-origin"],
            "http://allowed.com"
        );
        assert!(!reached.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_preflight_from_unknown_origin_has_no_allow_origin() {
        let res = call(
            &allow_list(&["http://allowed.com"]),
            request(Method::OPTIONS, Some("http://other.com")),
        )
        .await;

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(!res.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_options_without_origin_is_forwarded() {
        let res = call(&allow_list(&["*"]), request(Method::OPTIONS, None)).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
