//! Caller identification from request headers

use axum::http::{header, HeaderMap};
use stackgen_core::RequestIdentity;
use std::net::SocketAddr;

const AUTH_COOKIE: &str = "auth_token";

/// Resolve who is calling
///
/// A bearer credential comes from `Authorization: Bearer` or the
/// `auth_token` cookie. The client address is the socket peer, or the
/// first `X-Forwarded-For` entry when the gateway sits behind a trusted
/// proxy.
pub fn identify(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> RequestIdentity {
    let addr = client_addr(headers, peer, trust_forwarded_for);
    match bearer_token(headers) {
        Some(token) => RequestIdentity::bearer(&token, addr.as_deref()),
        None => RequestIdentity::anonymous(addr.as_deref()),
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, token) = v.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim().to_string())
        })
        .filter(|t| !t.is_empty());

    from_header.or_else(|| cookie(headers, AUTH_COOKIE))
}

fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn client_addr(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .filter(|_| trust_forwarded_for)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    forwarded.or_else(|| peer.map(|p| p.ip().to_string()))
}
