//! Client identity resolution for rate limiting.
//!
//! Every gating stage that needs to bucket callers asks this module for a
//! [`ClientIdentity`]. The identity is an opaque grouping key: it is *not*
//! validated as an IP address, it only has to be stable for one logical caller.
//!
//! # Precedence
//!
//! 1. First entry of `X-Forwarded-For`, trimmed
//! 2. `X-Real-IP`, verbatim
//! 3. Transport peer address (from axum's `ConnectInfo<SocketAddr>`), port stripped
//! 4. [`UNKNOWN_CLIENT`] when the request carries no peer address at all
//!
//! Blank header values are skipped, so the key is never empty.
//!
//! # Trusted Proxies
//!
//! With an empty [`TrustedProxyConfig`] the proxy headers are always honoured,
//! which assumes the gateway sits behind exactly one reverse proxy that
//! overwrites them. When CIDR ranges are configured, the headers are only
//! honoured if the transport peer lies inside one of them; otherwise the peer
//! address itself becomes the identity. Without that check, a client talking
//! to the gateway directly can rotate `X-Forwarded-For` values and get a fresh
//! bucket per request.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Identity used when neither proxy headers nor a peer address are available.
///
/// All such requests share one bucket.
pub const UNKNOWN_CLIENT: &str = "unknown";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Where a resolved identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentitySource {
    ForwardedFor,
    RealIp,
    Peer,
    Unknown,
}

impl IdentitySource {
    pub fn as_str(self) -> &'static str {
        match self {
            IdentitySource::ForwardedFor => "x-forwarded-for",
            IdentitySource::RealIp => "x-real-ip",
            IdentitySource::Peer => "peer",
            IdentitySource::Unknown => "unknown",
        }
    }
}

/// Opaque per-caller key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    key: String,
    source: IdentitySource,
}

impl ClientIdentity {
    /// Resolve the identity of the caller that sent `req`.
    ///
    /// Never fails; see the module docs for the precedence rules.
    pub fn resolve<B>(req: &Request<B>, trusted_proxies: &TrustedProxyConfig) -> Self {
        let peer = peer_addr(req);

        let honour_headers = match peer {
            Some(ip) => trusted_proxies.is_trusted(&ip),
            // No peer to check against: only an unrestricted config trusts headers.
            None => !trusted_proxies.is_enabled(),
        };

        if honour_headers {
            if let Some(forwarded) = header_str(req, X_FORWARDED_FOR)
                && let Some(first) = forwarded.split(',').next().map(str::trim)
                && !first.is_empty()
            {
                return Self::new(first, IdentitySource::ForwardedFor);
            }

            if let Some(real_ip) = header_str(req, X_REAL_IP)
                && !real_ip.trim().is_empty()
            {
                return Self::new(real_ip, IdentitySource::RealIp);
            }
        } else if req.headers().contains_key(X_FORWARDED_FOR)
            || req.headers().contains_key(X_REAL_IP)
        {
            debug!(
                peer = ?peer,
                "Ignoring proxy headers from untrusted peer"
            );
        }

        match peer {
            Some(ip) => Self::new(ip.to_string(), IdentitySource::Peer),
            None => Self::new(UNKNOWN_CLIENT, IdentitySource::Unknown),
        }
    }

    fn new(key: impl Into<String>, source: IdentitySource) -> Self {
        Self {
            key: key.into(),
            source,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn source(&self) -> IdentitySource {
        self.source
    }

    pub fn into_string(self) -> String {
        self.key
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

#[inline]
fn header_str<'a, B>(req: &'a Request<B>, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Transport peer address with the port dropped.
#[inline]
fn peer_addr<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse `"10.0.0.0/8"`, `"::1/128"` or a bare address (implicit /32 or /128).
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse().ok().filter(|len| *len <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Set of reverse-proxy networks whose forwarding headers are believed.
///
/// Built from an empty list it trusts every peer. A non-empty list whose
/// entries are all invalid trusts none.
#[derive(Debug, Clone)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
    trust_all: bool,
}

impl Default for TrustedProxyConfig {
    fn default() -> Self {
        Self {
            ranges: Vec::new(),
            trust_all: true,
        }
    }
}

impl TrustedProxyConfig {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    ///
    /// `Config::validate` rejects invalid entries before this is reached.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !cidrs.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Self {
            ranges,
            trust_all: cidrs.is_empty(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.trust_all
    }

    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.trust_all || self.ranges.iter().any(|range| range.contains(ip))
    }
}
