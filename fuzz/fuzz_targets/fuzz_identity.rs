//! Fuzz testing for request header parsing.
//!
//! Throws arbitrary header bytes, peer addresses and proxy CIDR lists at the
//! client identity resolver and the bearer token parser. Neither may panic.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_identity -- -max_total_time=60
//! ```

#![no_main]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use arbitrary::Arbitrary;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderValue, Request};
use libfuzzer_sys::fuzz_target;
use mcp_gateway::middleware::{ClientIdentity, TrustedProxyConfig, parse_bearer};

#[derive(Debug, Arbitrary)]
struct Input {
    forwarded_for: Option<Vec<u8>>,
    real_ip: Option<Vec<u8>>,
    authorization: String,
    peer: Option<([u8; 4], u16)>,
    trusted_proxies: Vec<String>,
}

fuzz_target!(|input: Input| {
    let _ = parse_bearer(&input.authorization);

    let mut req = Request::new(Body::empty());
    if let Some(bytes) = &input.forwarded_for
        && let Ok(value) = HeaderValue::from_bytes(bytes)
    {
        req.headers_mut().insert("x-forwarded-for", value);
    }
    if let Some(bytes) = &input.real_ip
        && let Ok(value) = HeaderValue::from_bytes(bytes)
    {
        req.headers_mut().insert("x-real-ip", value);
    }
    if let Some((octets, port)) = input.peer {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port);
        req.extensions_mut().insert(ConnectInfo(addr));
    }

    let trusted = TrustedProxyConfig::new(&input.trusted_proxies);
    let identity = ClientIdentity::resolve(&req, &trusted);
    let _ = identity.as_str().len();
});
