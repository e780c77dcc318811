//! Access Control Gate
//!
//! Decides whether a matched request may proceed. Checks run in a fixed
//! order and short-circuit on the first denial:
//!
//! 1. credential presence (`requires_auth`)
//! 2. credit balance (`requires_credit_check`)
//! 3. sliding-window rate limit
//! 4. route tier requirement
//!
//! Counters are only touched once every check has passed, and the whole
//! evaluation runs under a per-identity lock, so a denied request leaves
//! no trace and concurrent requests from one caller cannot both slip
//! under the limit.

use crate::credits::CreditLedger;
use crate::entitlement::EntitlementResolver;
use crate::ratelimit::{RateLimitResult, RateLimiter};
use crate::{can_access, GatewayError, GatewayResult, IdentityKey, RequestIdentity, Route};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Budget left after an admitted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub rate_limit: Option<RateLimitResult>,
    pub credits_remaining: Option<u64>,
}

pub struct AccessControlGate {
    limiter: Arc<RateLimiter>,
    credits: Arc<CreditLedger>,
    entitlements: Arc<EntitlementResolver>,
    request_cost: u64,
    locks: DashMap<IdentityKey, Arc<Mutex<()>>>,
}

impl AccessControlGate {
    pub fn new(
        limiter: Arc<RateLimiter>,
        credits: Arc<CreditLedger>,
        entitlements: Arc<EntitlementResolver>,
        request_cost: u64,
    ) -> Self {
        Self {
            limiter,
            credits,
            entitlements,
            request_cost,
            locks: DashMap::new(),
        }
    }

    pub fn admit(&self, route: &Route, identity: &RequestIdentity) -> GatewayResult<Admission> {
        self.admit_at(route, identity, Instant::now())
    }

    pub fn admit_at(&self, route: &Route, identity: &RequestIdentity, now: Instant) -> GatewayResult<Admission> {
        let lock = self
            .locks
            .entry(identity.key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();

        match self.evaluate(route, identity, now) {
            Ok(admission) => {
                tracing::debug!(
                    route = %route.url_pattern,
                    identity = %identity.key,
                    credits = ?admission.credits_remaining,
                    "request admitted"
                );
                Ok(admission)
            }
            Err(e) => {
                tracing::warn!(
                    route = %route.url_pattern,
                    identity = %identity.key,
                    reason = e.reason(),
                    "request denied"
                );
                Err(e)
            }
        }
    }

    fn evaluate(&self, route: &Route, identity: &RequestIdentity, now: Instant) -> GatewayResult<Admission> {
        let key = identity.key.as_str();

        if route.requires_auth && !identity.is_authenticated() {
            return Err(GatewayError::Unauthorized);
        }

        if route.requires_credit_check {
            let balance = self.credits.balance(key);
            if balance < self.request_cost {
                return Err(GatewayError::InsufficientCredits {
                    balance,
                    required: self.request_cost,
                });
            }
        }

        let window = route
            .rate_limit
            .as_ref()
            .map(|limit| (RateLimiter::key(key, &route.url_pattern), limit));
        let mut rate_limit = None;
        if let Some((window_key, limit)) = &window {
            let result = self.limiter.check_at(window_key, limit, now);
            if !result.allowed {
                return Err(GatewayError::RateLimited {
                    limit: result.limit,
                    retry_after_secs: result.retry_after_secs(),
                });
            }
            rate_limit = Some(result);
        }

        if let Some(required) = route.required_tier {
            let current = self.entitlements.current_tier(&identity.key);
            if !can_access(current, required) {
                return Err(GatewayError::EntitlementDenied {
                    current: current.level(),
                    required: required.level(),
                });
            }
        }

        if let Some((window_key, limit)) = &window {
            self.limiter.record_at(window_key, limit, now);
        }
        if let Some(result) = rate_limit.as_mut() {
            result.remaining = result.remaining.saturating_sub(1);
        }

        let credits_remaining = if route.requires_credit_check {
            let remaining = self
                .credits
                .try_debit(key, self.request_cost)
                .map_err(|_| GatewayError::InsufficientCredits {
                    balance: self.credits.balance(key),
                    required: self.request_cost,
                })?;
            Some(remaining)
        } else {
            None
        };

        Ok(Admission {
            rate_limit,
            credits_remaining,
        })
    }

    /// Return the credit cost of an admitted request whose upstream failed
    ///
    /// The rate-limit window keeps the admission.
    pub fn refund(&self, route: &Route, identity: &RequestIdentity) -> Option<u64> {
        if !route.requires_credit_check {
            return None;
        }
        let balance = self.credits.grant(identity.key.as_str(), self.request_cost);
        tracing::info!(
            route = %route.url_pattern,
            identity = %identity.key,
            balance,
            "credits refunded"
        );
        Some(balance)
    }

    /// Drop admission locks nobody is holding
    pub fn prune_locks(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn credits(&self) -> &CreditLedger {
        &self.credits
    }

    pub fn request_cost(&self) -> u64 {
        self.request_cost
    }
}
