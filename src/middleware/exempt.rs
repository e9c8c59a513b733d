//! Paths that skip authentication and rate limiting.
//!
//! # Path Matching Behavior
//!
//! Matching is **exact** against `request.uri().path()`:
//! - `/health` is exempt, `/health/` is NOT
//! - `/ready?probe=1` IS exempt (the query is not part of the path)
//! - `/HEALTH` is NOT exempt
//!
//! Exempt paths still go through CORS handling.

use std::collections::HashSet;
use std::sync::Arc;

/// Paths exempt by default: liveness and readiness probes.
pub const DEFAULT_EXEMPT_PATHS: [&str; 2] = ["/health", "/ready"];

/// Immutable, cheaply clonable set of exempt paths.
#[derive(Debug, Clone)]
pub struct ExemptPaths {
    paths: Arc<HashSet<String>>,
}

impl ExemptPaths {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            paths: Arc::new(paths.into_iter().map(Into::into).collect()),
        }
    }

    /// No path is exempt.
    pub fn none() -> Self {
        Self::new(Vec::<String>::new())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Default for ExemptPaths {
    fn default() -> Self {
        Self::new(DEFAULT_EXEMPT_PATHS)
    }
}
