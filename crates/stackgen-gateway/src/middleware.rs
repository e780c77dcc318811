//! Per-request access log

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Logs method, uri, status and latency of every request
pub async fn logging(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let latency_us = start.elapsed().as_micros() as u64;
    let status = response.status();
    let remaining = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    if status.is_server_error() {
        tracing::error!(%method, %uri, %status, latency_us, "request failed");
    } else if uri.path() == "/health" {
        // probes
        tracing::debug!(%method, %uri, %status, latency_us, "request complete");
    } else {
        tracing::info!(%method, %uri, %status, latency_us, remaining = %remaining, "request complete");
    }

    response
}
