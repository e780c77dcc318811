//! Services the gateway answers itself
//!
//! Each local service is a small axum router mounted at `/`. The
//! dispatcher strips the route's mount prefix and hands the admitted
//! request over with its `RequestIdentity` attached as an extension.

use crate::error::{ApiError, ApiResult};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{Request, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use stackgen_core::{
    normalize_path, CatalogCategory, CatalogItem, CatalogQuery, CatalogService, CreditLedger,
    EntitlementResolver, GatewayError, LocalService, PaymentRequest, PaymentResult, PaymentService,
    PaymentTransaction, RequestIdentity, Route, SubscriptionTier,
};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

/// Shared state behind the local services
pub struct ServiceState {
    pub catalog: CatalogService,
    pub payments: PaymentService,
    pub entitlements: Arc<EntitlementResolver>,
    pub credits: Arc<CreditLedger>,
}

#[derive(Clone)]
pub struct LocalServices {
    catalog: Router,
    payments: Router,
    entitlements: Router,
}

impl LocalServices {
    pub fn new(state: Arc<ServiceState>) -> Self {
        Self {
            catalog: catalog_router(state.clone()),
            payments: payments_router(state.clone()),
            entitlements: entitlements_router(state),
        }
    }

    /// Answer an admitted request for `service`
    pub async fn call(
        &self,
        service: LocalService,
        route: &Route,
        identity: RequestIdentity,
        request: Request<axum::body::Body>,
    ) -> Response {
        let (mut parts, body) = request.into_parts();

        let path = normalize_path(parts.uri.path());
        let relative = route.path_rewrite.apply(route.strip_mount(&path));
        let uri = match parts.uri.query() {
            Some(q) => format!("{relative}?{q}"),
            None => relative,
        };
        parts.uri = match uri.parse::<Uri>() {
            Ok(uri) => uri,
            Err(e) => return ApiError(GatewayError::BadRequest(format!("invalid path: {e}"))).into_response(),
        };
        parts.extensions.insert(identity);

        let router = match service {
            LocalService::Catalog => self.catalog.clone(),
            LocalService::Payments => self.payments.clone(),
            LocalService::Entitlements => self.entitlements.clone(),
        };

        match router.oneshot(Request::from_parts(parts, body)).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

fn not_found() -> ApiError {
    ApiError(GatewayError::ResourceNotFound("no such resource".into()))
}

// =============================================================================
// Catalog
// =============================================================================

fn catalog_router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route("/", get(list_categories))
        .route("/:category", get(list_items))
        .route("/:category/*item", get(get_item))
        .fallback(|| async { not_found() })
        .with_state(state)
}

async fn list_categories() -> Json<Vec<&'static str>> {
    Json(CatalogCategory::ALL.iter().map(|c| c.as_str()).collect())
}

async fn list_items(
    State(state): State<Arc<ServiceState>>,
    Extension(identity): Extension<RequestIdentity>,
    Path(category): Path<String>,
    query: Result<Query<CatalogQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<CatalogItem>>> {
    let category: CatalogCategory = category.parse()?;
    let Query(query) = query.map_err(|e| GatewayError::BadRequest(e.body_text()))?;
    let tier = state.entitlements.current_tier(&identity.key);

    Ok(Json(state.catalog.list(category, tier, &query).await?))
}

/// `/{category}/{id}` or `/{category}/code/{code}`
async fn get_item(
    State(state): State<Arc<ServiceState>>,
    Extension(identity): Extension<RequestIdentity>,
    Path((category, item)): Path<(String, String)>,
) -> ApiResult<Json<CatalogItem>> {
    let category: CatalogCategory = category.parse()?;
    let tier = state.entitlements.current_tier(&identity.key);

    let item = match item.trim_start_matches('/').split_once('/') {
        Some(("code", code)) => state.catalog.get_by_code(category, code, tier).await?,
        Some(_) => return Err(not_found()),
        None => {
            let raw = item.trim_start_matches('/');
            let id = Uuid::parse_str(raw).map_err(|_| GatewayError::BadRequest(format!("invalid id {raw}")))?;
            state.catalog.get(category, id, tier).await?
        }
    };

    Ok(Json(item))
}

// =============================================================================
// Payments
// =============================================================================

fn payments_router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route("/", post(create_payment).get(list_payments))
        .fallback(|| async { not_found() })
        .with_state(state)
}

async fn create_payment(
    State(state): State<Arc<ServiceState>>,
    Extension(identity): Extension<RequestIdentity>,
    body: Result<Json<PaymentRequest>, JsonRejection>,
) -> ApiResult<Json<PaymentResult>> {
    let Json(request) = body.map_err(|e| GatewayError::BadRequest(e.body_text()))?;
    let transaction = state.payments.pay(&identity.key, request).await;
    Ok(Json(transaction.result()))
}

/// The caller's own transactions, oldest first
async fn list_payments(
    State(state): State<Arc<ServiceState>>,
    Extension(identity): Extension<RequestIdentity>,
) -> Json<Vec<PaymentTransaction>> {
    Json(state.payments.history(&identity.key))
}

// =============================================================================
// Entitlements
// =============================================================================

fn entitlements_router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route("/me", get(get_entitlement).put(change_entitlement))
        .fallback(|| async { not_found() })
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementResponse {
    pub premium_level: SubscriptionTier,
    pub is_free: bool,
    pub is_premium: bool,
    pub is_premium_plus: bool,
    pub credits: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierChangeRequest {
    pub new_level: u8,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierChangeResponse {
    pub success: bool,
    pub premium_level: SubscriptionTier,
}

async fn get_entitlement(
    State(state): State<Arc<ServiceState>>,
    Extension(identity): Extension<RequestIdentity>,
) -> Json<EntitlementResponse> {
    let tier = state.entitlements.current_tier(&identity.key);
    Json(EntitlementResponse {
        premium_level: tier,
        is_free: tier.is_free(),
        is_premium: tier.is_premium(),
        is_premium_plus: tier.is_premium_plus(),
        credits: state.credits.balance(identity.key.as_str()),
    })
}

async fn change_entitlement(
    State(state): State<Arc<ServiceState>>,
    Extension(identity): Extension<RequestIdentity>,
    body: Result<Json<TierChangeRequest>, JsonRejection>,
) -> ApiResult<Json<TierChangeResponse>> {
    let Json(request) = body.map_err(|e| GatewayError::BadRequest(e.body_text()))?;
    let target = SubscriptionTier::try_from(request.new_level)?;

    let transaction = match request.transaction_id.as_deref() {
        Some(id) => Some(
            state
                .payments
                .transaction(id)
                .ok_or_else(|| GatewayError::PaymentFailed(format!("unknown transaction {id}")))?,
        ),
        None => None,
    };

    state
        .entitlements
        .change_tier(&identity.key, target, transaction.as_ref())?;

    Ok(Json(TierChangeResponse {
        success: true,
        premium_level: state.entitlements.current_tier(&identity.key),
    }))
}
