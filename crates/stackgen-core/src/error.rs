//! Error types for the StackGen gateway

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gateway error type
///
/// Every variant is terminal for the request that produced it; nothing is
/// retried internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// No route claims the path
    #[error("no route matches {0}")]
    RouteNotFound(String),

    /// Catalog lookup found nothing
    #[error("{0}")]
    ResourceNotFound(String),

    /// Route requires a bearer credential
    #[error("authentication required")]
    Unauthorized,

    /// Credit balance below the request cost
    #[error("insufficient credits: balance {balance}, required {required}")]
    InsufficientCredits { balance: u64, required: u64 },

    /// Tier below what the resource requires
    #[error("tier {current} cannot access resources requiring tier {required}")]
    EntitlementDenied { current: u8, required: u8 },

    /// Sliding window is full
    #[error("too many requests, please try again later")]
    RateLimited { limit: u32, retry_after_secs: u64 },

    /// Payment missing, failed, mismatched or replayed
    #[error("{0}")]
    PaymentFailed(String),

    /// Upstream refused or dropped the connection
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream did not answer in time
    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),

    /// Malformed request input
    #[error("{0}")]
    BadRequest(String),

    /// Invalid gateway configuration
    #[error("config error: {0}")]
    Config(String),
}

/// Result type for the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Wire shape of every error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl GatewayError {
    /// HTTP status code for this error
    pub fn status(&self) -> u16 {
        match self {
            Self::RouteNotFound(_) | Self::ResourceNotFound(_) => 404,
            Self::Unauthorized => 401,
            Self::InsufficientCredits { .. } | Self::PaymentFailed(_) => 402,
            Self::EntitlementDenied { .. } => 403,
            Self::RateLimited { .. } => 429,
            Self::UpstreamUnavailable(_) => 502,
            Self::UpstreamTimeout(_) => 504,
            Self::BadRequest(_) => 400,
            Self::Config(_) => 500,
        }
    }

    /// Short label placed in the `error` field
    pub fn label(&self) -> &'static str {
        match self {
            Self::RouteNotFound(_) | Self::ResourceNotFound(_) => "Not Found",
            Self::Unauthorized => "Unauthorized",
            Self::InsufficientCredits { .. } => "Payment Required",
            Self::EntitlementDenied { .. } => "Forbidden",
            Self::RateLimited { .. } => "Rate limit exceeded",
            Self::PaymentFailed(_) => "Payment Failed",
            Self::UpstreamUnavailable(_) => "Bad Gateway",
            Self::UpstreamTimeout(_) => "Gateway Timeout",
            Self::BadRequest(_) => "Bad Request",
            Self::Config(_) => "Internal Server Error",
        }
    }

    /// Stable machine-readable reason, used for logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Self::RouteNotFound(_) => "route_not_found",
            Self::ResourceNotFound(_) => "resource_not_found",
            Self::Unauthorized => "unauthorized",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::EntitlementDenied { .. } => "entitlement_denied",
            Self::RateLimited { .. } => "rate_limited",
            Self::PaymentFailed(_) => "payment_failed",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::UpstreamTimeout(_) => "upstream_timeout",
            Self::BadRequest(_) => "bad_request",
            Self::Config(_) => "config",
        }
    }

    /// Structured response body
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.label().to_string(),
            message: self.to_string(),
        }
    }
}
