//! StackGen Gateway Core
//!
//! Domain logic for the gateway in front of the project generator:
//! - Route table with longest-prefix matching and path exclusions
//! - Access control (credential, credits, sliding-window rate limits)
//! - Subscription tiers and per-caller entitlement records
//! - Tier-filtered stack catalog
//! - Payment collaborator and single-use payment transactions
//!
//! # Request flow
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────────────┐   ┌──────────────┐
//! │ request  │──▶│ RouteTable │──▶│ AccessControlGate │──▶│ local service│
//! └──────────┘   └────────────┘   │ auth ▸ credits ▸  │   │  or upstream │
//!                                 │ rate ▸ tier       │   └──────────────┘
//!                                 └─────────┬─────────┘
//!                                           │ reads
//!                                 ┌─────────▼─────────┐
//!                                 │EntitlementResolver│◀── PaymentTransaction
//!                                 └───────────────────┘
//! ```

pub mod access;
pub mod catalog;
pub mod credits;
pub mod entitlement;
pub mod error;
pub mod identity;
pub mod payments;
pub mod ratelimit;
pub mod routing;
pub mod tier;

// Re-exports
pub use access::{AccessControlGate, Admission};
pub use catalog::{CatalogCategory, CatalogItem, CatalogQuery, CatalogService, CatalogStore, InMemoryCatalog};
pub use credits::CreditLedger;
pub use entitlement::{visible_items, Entitlement, EntitlementResolver, TierChange};
pub use error::{ErrorBody, GatewayError, GatewayResult};
pub use identity::{IdentityKey, RequestIdentity};
pub use payments::{
    plan_tier, PaymentProcessor, PaymentRequest, PaymentResult, PaymentService, PaymentTransaction,
    SimulatedPaymentProcessor,
};
pub use ratelimit::{RateLimitResult, RateLimiter};
pub use routing::{
    normalize_path, LocalService, PathExclusion, PathRewrite, RateLimit, Route, RouteSpec, RouteTable,
    RouteTarget,
};
pub use tier::{can_access, SubscriptionTier};
