//! Upstream forwarding
//!
//! Requests are forwarded once. Connection failures map to 502 and
//! timeouts to 504; nothing is retried.

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::Response;
use stackgen_core::{normalize_path, GatewayError, GatewayResult, Route, RouteTarget};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

/// Largest request body relayed upstream
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "host",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Upstream URL for a request path on `route`
///
/// The mount prefix is stripped, the route's rewrite applied, and the
/// result joined onto the target's own path. A bare mount maps to the
/// target path itself. The query is kept as is.
pub fn upstream_url(target: &Url, route: &Route, path: &str, query: Option<&str>) -> Url {
    let relative = route.path_rewrite.apply(route.strip_mount(path));
    let base = target.path().trim_end_matches('/');

    let mut url = target.clone();
    if relative == "/" && !base.is_empty() {
        url.set_path(base);
    } else {
        url.set_path(&format!("{base}{relative}"));
    }
    url.set_query(query);
    url
}

pub struct ProxyDispatcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl ProxyDispatcher {
    pub fn new(timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Config(format!("cannot build upstream client: {e}")))?;
        Ok(Self { client, timeout })
    }

    pub async fn forward(&self, route: &Route, request: Request<Body>, peer: Option<SocketAddr>) -> GatewayResult<Response> {
        let RouteTarget::Upstream(target) = &route.target else {
            return Err(GatewayError::Config(format!(
                "route {} has no upstream target",
                route.url_pattern
            )));
        };

        let (parts, body) = request.into_parts();
        let path = normalize_path(parts.uri.path());
        let url = upstream_url(target, route, &path, parts.uri.query());
        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|_| GatewayError::BadRequest(format!("unsupported method {}", parts.method)))?;
        let body = to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| GatewayError::BadRequest(format!("unreadable request body: {e}")))?;

        let mut upstream = self.client.request(method, url.clone());
        for (name, value) in &parts.headers {
            if is_hop_by_hop(name.as_str())
                || matches!(name.as_str(), "content-length" | "x-forwarded-for" | "x-forwarded-host")
            {
                continue;
            }
            upstream = upstream.header(name.as_str(), value.as_bytes());
        }
        for (name, value) in forwarding_headers(&parts.headers, peer) {
            upstream = upstream.header(name, value);
        }
        if !route.change_origin {
            if let Some(host) = parts.headers.get(header::HOST) {
                upstream = upstream.header("host", host.as_bytes());
            }
        }

        tracing::debug!(route = %route.url_pattern, upstream = %url, "forwarding request");

        let response = upstream
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify(&url, e))?;

        relay(response).await.map_err(|e| self.classify(&url, e))
    }

    fn classify(&self, url: &Url, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            tracing::error!(upstream = %url, timeout_ms = self.timeout.as_millis() as u64, "upstream timed out");
            GatewayError::UpstreamTimeout(format!("{} did not answer in time", origin(url)))
        } else {
            tracing::error!(upstream = %url, error = %e, "upstream unavailable");
            GatewayError::UpstreamUnavailable(format!("{} is unreachable", origin(url)))
        }
    }
}

fn origin(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// `X-Forwarded-For` with the peer appended, and `X-Forwarded-Host`
fn forwarding_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> Vec<(&'static str, String)> {
    let mut out = Vec::new();

    let prior = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let forwarded_for = match (prior, peer) {
        (Some(prior), Some(peer)) => Some(format!("{prior}, {}", peer.ip())),
        (Some(prior), None) => Some(prior.to_string()),
        (None, Some(peer)) => Some(peer.ip().to_string()),
        (None, None) => None,
    };
    if let Some(value) = forwarded_for {
        out.push(("x-forwarded-for", value));
    }

    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok());
    if let Some(host) = host {
        out.push(("x-forwarded-host", host.to_string()));
    }

    out
}

async fn relay(upstream: reqwest::Response) -> Result<Response, reqwest::Error> {
    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if is_hop_by_hop(name.as_str()) || name.as_str().eq_ignore_ascii_case("content-length") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }

    let body = upstream.bytes().await?;
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackgen_core::routing::{ComputedRewrite, RewriteRule};
    use stackgen_core::PathRewrite;

    fn target(route: &Route) -> &Url {
        match &route.target {
            RouteTarget::Upstream(url) => url,
            RouteTarget::Local(_) => unreachable!(),
        }
    }

    #[test]
    fn test_mount_prefix_is_stripped() {
        let route = Route::upstream("/public", "http://localhost:5050").unwrap();
        let url = upstream_url(target(&route), &route, "/public/api/v1/languages", Some("active=true"));
        assert_eq!(url.as_str(), "http://localhost:5050/api/v1/languages?active=true");

        let url = upstream_url(target(&route), &route, "/public", None);
        assert_eq!(url.as_str(), "http://localhost:5050/");
    }

    #[test]
    fn test_target_path_is_kept() {
        let route = Route::upstream("/private/api-docs", "http://localhost:5555/swagger/index.html").unwrap();
        let url = upstream_url(target(&route), &route, "/private/api-docs", None);
        assert_eq!(url.as_str(), "http://localhost:5555/swagger/index.html");

        let url = upstream_url(target(&route), &route, "/private/api-docs/swagger.json", None);
        assert_eq!(url.path(), "/swagger/index.html/swagger.json");
    }

    #[test]
    fn test_rewrites_apply_after_strip() {
        let route = Route::upstream("/public", "http://localhost:5050")
            .unwrap()
            .with_rewrite(PathRewrite::Computed(ComputedRewrite::AddPrefix("/api/v1".into())));
        let url = upstream_url(target(&route), &route, "/public/languages", None);
        assert_eq!(url.path(), "/api/v1/languages");

        let route = Route::upstream("/legacy", "http://localhost:5050")
            .unwrap()
            .with_rewrite(PathRewrite::Mapping(vec![RewriteRule::new("^/v0/", "/v1/").unwrap()]));
        let url = upstream_url(target(&route), &route, "/legacy/v0/items", None);
        assert_eq!(url.path(), "/v1/items");
    }

    #[test]
    fn test_forwarding_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        let peer: SocketAddr = "10.0.0.2:5000".parse().unwrap();

        let out = forwarding_headers(&headers, Some(peer));
        assert!(out.contains(&("x-forwarded-for", "203.0.113.9, 10.0.0.2".to_string())));
        assert!(out.contains(&("x-forwarded-host", "gateway.local".to_string())));
    }

    #[test]
    fn test_hop_by_hop() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("host"));
        assert!(!is_hop_by_hop("authorization"));
    }
}
