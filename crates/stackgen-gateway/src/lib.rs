//! StackGen API Gateway
//!
//! Front door for the project generator. Every request outside the
//! built-in endpoints is matched against the route table, admitted by the
//! access-control gate, then answered by a local service (catalog,
//! payments, entitlements) or forwarded to the public/private API.

pub mod config;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod middleware;
pub mod proxy;
pub mod services;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use stackgen_core::{
    AccessControlGate, CatalogService, CatalogStore, CreditLedger, EntitlementResolver, GatewayResult,
    InMemoryCatalog, PaymentProcessor, PaymentService, RateLimiter, RouteTable, RouteTarget,
    SimulatedPaymentProcessor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::GatewaySettings;
pub use error::ApiError;
pub use metrics::{GatewayMetrics, TrackedState};
pub use proxy::ProxyDispatcher;
pub use services::{LocalServices, ServiceState};

/// Application state shared across handlers
pub struct AppState {
    pub settings: GatewaySettings,
    pub routes: RouteTable,
    pub gate: AccessControlGate,
    pub proxy: ProxyDispatcher,
    pub local: LocalServices,
    pub services: Arc<ServiceState>,
    pub metrics: GatewayMetrics,
}

impl AppState {
    /// State with the configured routes, seeded catalog and simulated payments
    pub fn new(settings: GatewaySettings) -> GatewayResult<Self> {
        let routes = settings.routes()?;
        let processor = Arc::new(SimulatedPaymentProcessor::new(settings.payment_latency()));
        let catalog = Arc::new(InMemoryCatalog::seeded()?);
        Self::with_parts(settings, routes, processor, catalog)
    }

    pub fn with_parts(
        settings: GatewaySettings,
        routes: RouteTable,
        processor: Arc<dyn PaymentProcessor>,
        catalog: Arc<dyn CatalogStore>,
    ) -> GatewayResult<Self> {
        let credits = Arc::new(CreditLedger::new(settings.default_credits));
        let entitlements = Arc::new(EntitlementResolver::new());
        let gate = AccessControlGate::new(
            Arc::new(RateLimiter::new()),
            credits.clone(),
            entitlements.clone(),
            settings.request_cost,
        );

        let services = Arc::new(ServiceState {
            catalog: CatalogService::new(catalog),
            payments: PaymentService::new(processor),
            entitlements,
            credits,
        });

        Ok(Self {
            proxy: ProxyDispatcher::new(settings.upstream_timeout())?,
            local: LocalServices::new(services.clone()),
            services,
            routes,
            gate,
            metrics: GatewayMetrics::new(),
            settings,
        })
    }
}

/// Build the gateway router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(root))
        .route("/metrics", get(metrics_text))
        .fallback(dispatch)
        .layer(axum::middleware::from_fn(middleware::logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "api-gateway",
    })
}

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
    version: &'static str,
    environment: String,
}

async fn root(State(state): State<Arc<AppState>>) -> Json<RootResponse> {
    Json(RootResponse {
        message: "StackGen API Gateway",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.settings.environment.clone(),
    })
}

async fn metrics_text(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tracked = TrackedState {
        rate_windows: state.gate.limiter().tracked_keys(),
        entitlement_records: state.services.entitlements.tracked_identities(),
    };
    (StatusCode::OK, state.metrics.render(tracked))
}

/// Match, admit, then answer locally or forward
async fn dispatch(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    state.metrics.record_request();

    let route = match state.routes.match_path(request.uri().path()) {
        Ok(route) => route,
        Err(e) => {
            state.metrics.record_denial(e.reason());
            return ApiError(e).into_response();
        }
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = identity::identify(request.headers(), peer, state.settings.trust_forwarded_for);

    let mut admission = match state.gate.admit(route, &identity) {
        Ok(admission) => admission,
        Err(e) => {
            state.metrics.record_denial(e.reason());
            return ApiError(e).into_response();
        }
    };
    state.metrics.record_admission(&route.url_pattern);

    let mut response = match &route.target {
        RouteTarget::Local(service) => state.local.call(*service, route, identity, request).await,
        RouteTarget::Upstream(_) => match state.proxy.forward(route, request, peer).await {
            Ok(response) => response,
            Err(e) => {
                state.metrics.record_upstream_error();
                if let Some(balance) = state.gate.refund(route, &identity) {
                    admission.credits_remaining = Some(balance);
                }
                ApiError(e).into_response()
            }
        },
    };

    if let Some(result) = &admission.rate_limit {
        for (name, value) in RateLimiter::headers(result) {
            if let Ok(value) = HeaderValue::from_str(&value) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(name), value);
            }
        }
    }
    if let Some(credits) = admission.credits_remaining {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-credits-remaining"), HeaderValue::from(credits));
    }

    response
}

/// Drop idle per-caller state: rate windows, admission locks, expired
/// transactions and entitlement records equal to the default
pub fn prune_idle_state(state: &AppState) {
    let windows = state.gate.limiter().prune();
    let locks = state.gate.prune_locks();
    let transactions = state.services.payments.prune(state.settings.transaction_ttl());
    let entitlements = state
        .services
        .entitlements
        .prune(|id| state.services.payments.contains(id));

    if windows + locks + transactions + entitlements > 0 {
        tracing::debug!(windows, locks, transactions, entitlements, "pruned idle caller state");
    }
}

/// Run `prune_idle_state` on a fixed interval
pub fn spawn_maintenance(state: Arc<AppState>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            prune_idle_state(&state);
        }
    })
}

/// Start the gateway server
pub async fn serve(settings: GatewaySettings) -> anyhow::Result<()> {
    let addr = settings.bind_addr();
    let state = Arc::new(AppState::new(settings)?);
    tracing::info!(routes = state.routes.len(), environment = %state.settings.environment, "route table loaded");

    spawn_maintenance(state.clone(), Duration::from_secs(60));
    let app = build_router(state);

    tracing::info!("StackGen gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
