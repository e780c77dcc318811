//! Gateway configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! file named by `CONFIG_FILE`, then plain environment variables
//! (`PORT`, `PUBLIC_API_URL`, `RATE_LIMIT_MAX`, ...).

use serde::{Deserialize, Serialize};
use stackgen_core::{
    GatewayError, GatewayResult, LocalService, PathExclusion, RateLimit, Route, RouteSpec, RouteTable,
    SubscriptionTier,
};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewaySettings {
    pub port: u16,
    pub public_api_url: String,
    pub private_api_url: String,
    pub environment: String,
    pub log_level: String,
    /// Default requests per window
    pub rate_limit_max: u32,
    /// Default window, seconds
    pub rate_limit_window: u64,
    pub default_credits: u64,
    pub request_cost: u64,
    pub upstream_timeout_secs: u64,
    pub payment_latency_ms: u64,
    /// Recorded payments are forgotten after this many seconds
    pub transaction_ttl_secs: u64,
    /// Key anonymous callers by `X-Forwarded-For`; only behind a trusted proxy
    pub trust_forwarded_for: bool,
    /// JSON array of route definitions replacing the defaults
    pub routes_file: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            port: 5000,
            public_api_url: "http://localhost:5050".to_string(),
            private_api_url: "http://localhost:5555".to_string(),
            environment: "development".to_string(),
            log_level: "info".to_string(),
            rate_limit_max: 100,
            rate_limit_window: 60,
            default_credits: 100,
            request_cost: 1,
            upstream_timeout_secs: 30,
            payment_latency_ms: 1000,
            transaction_ttl_secs: 86_400,
            trust_forwarded_for: false,
            routes_file: None,
        }
    }
}

impl GatewaySettings {
    /// Load defaults, `CONFIG_FILE` and the environment
    pub fn load() -> GatewayResult<Self> {
        let defaults = Self::default();
        let mut builder = config::Config::builder()
            .set_default("port", i64::from(defaults.port))
            .and_then(|b| b.set_default("public_api_url", defaults.public_api_url))
            .and_then(|b| b.set_default("private_api_url", defaults.private_api_url))
            .and_then(|b| b.set_default("environment", defaults.environment))
            .and_then(|b| b.set_default("log_level", defaults.log_level))
            .and_then(|b| b.set_default("rate_limit_max", i64::from(defaults.rate_limit_max)))
            .and_then(|b| b.set_default("rate_limit_window", defaults.rate_limit_window as i64))
            .and_then(|b| b.set_default("default_credits", defaults.default_credits as i64))
            .and_then(|b| b.set_default("request_cost", defaults.request_cost as i64))
            .and_then(|b| b.set_default("upstream_timeout_secs", defaults.upstream_timeout_secs as i64))
            .and_then(|b| b.set_default("payment_latency_ms", defaults.payment_latency_ms as i64))
            .and_then(|b| b.set_default("transaction_ttl_secs", defaults.transaction_ttl_secs as i64))
            .and_then(|b| b.set_default("trust_forwarded_for", defaults.trust_forwarded_for))
            .map_err(config_error)?;

        if let Ok(path) = std::env::var("CONFIG_FILE") {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        }

        builder
            .add_source(config::Environment::default().try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn payment_latency(&self) -> Duration {
        Duration::from_millis(self.payment_latency_ms)
    }

    pub fn transaction_ttl(&self) -> Duration {
        Duration::from_secs(self.transaction_ttl_secs)
    }

    pub fn default_rate_limit(&self) -> GatewayResult<RateLimit> {
        RateLimit::new(self.rate_limit_window.saturating_mul(1000), self.rate_limit_max)
    }

    /// Route table from `routes_file`, or the built-in table
    pub fn routes(&self) -> GatewayResult<RouteTable> {
        match &self.routes_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| GatewayError::Config(format!("cannot read routes file {path}: {e}")))?;
                Self::parse_routes(&raw)
            }
            None => self.default_routes(),
        }
    }

    pub fn parse_routes(json: &str) -> GatewayResult<RouteTable> {
        let specs: Vec<RouteSpec> = serde_json::from_str(json)
            .map_err(|e| GatewayError::Config(format!("invalid routes file: {e}")))?;
        RouteTable::from_specs(specs)
    }

    pub fn default_routes(&self) -> GatewayResult<RouteTable> {
        let limit = self.default_rate_limit()?;
        let public = self.public_api_url.trim_end_matches('/');
        let private = self.private_api_url.trim_end_matches('/');

        RouteTable::new(vec![
            Route::upstream("/public", public)?.with_rate_limit(limit),
            Route::upstream("/public/api-docs", &format!("{public}/api-docs"))?.with_rate_limit(limit),
            Route::upstream("/private/api-docs", &format!("{private}/swagger/index.html"))?
                .with_rate_limit(limit),
            Route::upstream("/private", private)?
                .with_rate_limit(limit)
                .with_exclusion(PathExclusion::prefixes(["/private/api-docs"])),
            Route::local("/catalog", LocalService::Catalog)?.with_rate_limit(limit),
            Route::local("/payments", LocalService::Payments)?
                .with_auth()
                .with_rate_limit(RateLimit::new(60_000, 10)?),
            Route::local("/entitlements", LocalService::Entitlements)?
                .with_auth()
                .with_rate_limit(limit),
            Route::upstream("/generate", public)?
                .with_auth()
                .with_credit_check()
                .with_rate_limit(limit)
                .with_required_tier(SubscriptionTier::Free),
        ])
    }
}

fn config_error(e: config::ConfigError) -> GatewayError {
    GatewayError::Config(e.to_string())
}
