//! HTTP rendering of gateway errors

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use stackgen_core::{GatewayError, RateLimitResult, RateLimiter};
use std::time::Duration;

/// `GatewayError` as an axum response
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.0.body())).into_response();

        if let GatewayError::RateLimited { limit, retry_after_secs } = self.0 {
            let denied = RateLimitResult {
                allowed: false,
                remaining: 0,
                limit,
                retry_after: Some(Duration::from_secs(retry_after_secs)),
            };
            let headers = response.headers_mut();
            for (name, value) in RateLimiter::headers(&denied) {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(HeaderName::from_static(name), value);
                }
            }
        }

        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_headers() {
        let response = ApiError(GatewayError::RateLimited { limit: 5, retry_after_secs: 42 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "42");
        assert_eq!(response.headers()["x-ratelimit-limit"], "5");
    }

    #[test]
    fn test_status_passthrough() {
        let response = ApiError(GatewayError::UpstreamTimeout("slow".into())).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let response = ApiError(GatewayError::InsufficientCredits { balance: 0, required: 1 }).into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }
}
