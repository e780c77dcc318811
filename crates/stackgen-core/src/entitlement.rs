//! Tier entitlements
//!
//! One tier record per caller identity. Downgrades apply at once; an
//! upgrade is held as pending until a successful payment transaction
//! settles it. Each transaction id settles at most one upgrade.

use crate::catalog::CatalogItem;
use crate::payments::PaymentTransaction;
use crate::{can_access, GatewayError, GatewayResult, IdentityKey, SubscriptionTier};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Items a caller at `tier` may see
pub fn visible_items(items: &[CatalogItem], tier: SubscriptionTier) -> Vec<CatalogItem> {
    items
        .iter()
        .filter(|item| item.is_active && can_access(tier, item.required_tier))
        .cloned()
        .collect()
}

/// Outcome of a tier change request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TierChange {
    Applied {
        from: SubscriptionTier,
        to: SubscriptionTier,
    },
    PendingPayment {
        target: SubscriptionTier,
    },
}

/// Snapshot of a caller's entitlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub tier: SubscriptionTier,
    pub pending: Option<SubscriptionTier>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct TierRecord {
    tier: SubscriptionTier,
    pending: Option<SubscriptionTier>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<IdentityKey, TierRecord>,
    consumed: HashSet<String>,
}

impl Inner {
    fn request(&mut self, identity: &IdentityKey, target: SubscriptionTier) -> TierChange {
        let record = self.records.entry(identity.clone()).or_default();

        if target > record.tier {
            record.pending = Some(target);
            return TierChange::PendingPayment { target };
        }

        let from = record.tier;
        record.tier = target;
        record.pending = None;
        record.updated_at = Some(Utc::now());
        TierChange::Applied { from, to: target }
    }

    fn settle(&mut self, identity: &IdentityKey, tx: &PaymentTransaction) -> GatewayResult<TierChange> {
        if self.consumed.contains(&tx.transaction_id) {
            return Err(GatewayError::PaymentFailed("transaction already consumed".into()));
        }
        if &tx.identity != identity {
            return Err(GatewayError::PaymentFailed(
                "transaction belongs to another caller".into(),
            ));
        }
        if !tx.success {
            return Err(GatewayError::PaymentFailed(
                tx.error.clone().unwrap_or_else(|| "payment failed".into()),
            ));
        }

        let record = self.records.entry(identity.clone()).or_default();
        let target = record
            .pending
            .ok_or_else(|| GatewayError::PaymentFailed("no upgrade pending".into()))?;
        if tx.resulting_tier != target {
            return Err(GatewayError::PaymentFailed(format!(
                "transaction grants tier {} but tier {} was requested",
                tx.resulting_tier.level(),
                target.level()
            )));
        }

        let from = record.tier;
        record.tier = target;
        record.pending = None;
        record.updated_at = Some(Utc::now());
        self.consumed.insert(tx.transaction_id.clone());
        Ok(TierChange::Applied { from, to: target })
    }
}

/// Sole owner of caller tiers
#[derive(Default)]
pub struct EntitlementResolver {
    inner: Mutex<Inner>,
}

impl EntitlementResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current tier; Free for callers never seen before
    pub fn current_tier(&self, identity: &IdentityKey) -> SubscriptionTier {
        self.inner
            .lock()
            .records
            .get(identity)
            .map(|r| r.tier)
            .unwrap_or_default()
    }

    pub fn entitlement(&self, identity: &IdentityKey) -> Entitlement {
        let inner = self.inner.lock();
        match inner.records.get(identity) {
            Some(r) => Entitlement {
                tier: r.tier,
                pending: r.pending,
                updated_at: r.updated_at,
            },
            None => Entitlement {
                tier: SubscriptionTier::Free,
                pending: None,
                updated_at: None,
            },
        }
    }

    pub fn request_change(&self, identity: &IdentityKey, target: SubscriptionTier) -> TierChange {
        let change = self.inner.lock().request(identity, target);
        log_change(identity, &change);
        change
    }

    /// Apply the pending upgrade paid for by `tx`
    pub fn settle(&self, identity: &IdentityKey, tx: &PaymentTransaction) -> GatewayResult<TierChange> {
        let result = self.inner.lock().settle(identity, tx);
        match &result {
            Ok(change) => log_change(identity, change),
            Err(e) => tracing::warn!(identity = %identity, transaction_id = %tx.transaction_id, reason = %e, "tier settlement rejected"),
        }
        result
    }

    /// Drop Free-tier records and consumed ids whose transaction is gone
    ///
    /// A Free record carries nothing the default lacks: the endpoint
    /// re-requests before every settlement. A consumed id only needs
    /// remembering while `is_live` still finds its transaction.
    pub fn prune(&self, is_live: impl Fn(&str) -> bool) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.records.len() + inner.consumed.len();
        inner.records.retain(|_, r| r.tier != SubscriptionTier::Free);
        inner.consumed.retain(|id| is_live(id));
        before - inner.records.len() - inner.consumed.len()
    }

    pub fn tracked_identities(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Request and settle in one step
    pub fn change_tier(
        &self,
        identity: &IdentityKey,
        target: SubscriptionTier,
        tx: Option<&PaymentTransaction>,
    ) -> GatewayResult<TierChange> {
        let result = {
            let mut inner = self.inner.lock();
            match (inner.request(identity, target), tx) {
                (applied @ TierChange::Applied { .. }, _) => Ok(applied),
                (TierChange::PendingPayment { .. }, Some(tx)) => inner.settle(identity, tx),
                (TierChange::PendingPayment { .. }, None) => {
                    Err(GatewayError::PaymentFailed("payment required".into()))
                }
            }
        };

        match &result {
            Ok(change) => log_change(identity, change),
            Err(e) => tracing::warn!(identity = %identity, target_tier = target.level(), reason = %e, "tier change rejected"),
        }
        result
    }
}

fn log_change(identity: &IdentityKey, change: &TierChange) {
    match change {
        TierChange::Applied { from, to } => {
            tracing::info!(identity = %identity, from = from.level(), to = to.level(), "tier changed")
        }
        TierChange::PendingPayment { target } => {
            tracing::debug!(identity = %identity, target_tier = target.level(), "upgrade awaiting payment")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn transaction(id: &str, identity: &IdentityKey, tier: SubscriptionTier, success: bool) -> PaymentTransaction {
        PaymentTransaction {
            transaction_id: id.into(),
            identity: identity.clone(),
            plan_id: "premium".into(),
            amount: Decimal::new(900, 2),
            currency: "EUR".into(),
            resulting_tier: tier,
            success,
            error: (!success).then(|| "card declined".to_string()),
            created_at: Utc::now(),
        }
    }

    fn items() -> Vec<CatalogItem> {
        vec![
            CatalogItem::new("node", "Node.js", SubscriptionTier::Free),
            CatalogItem::new("java", "Java", SubscriptionTier::Premium),
            CatalogItem::new("go", "Go", SubscriptionTier::PremiumPlus),
            CatalogItem::new("cobol", "COBOL", SubscriptionTier::Free).inactive(),
        ]
    }

    #[test]
    fn test_visible_items_by_tier() {
        let items = items();
        let codes = |tier| -> Vec<String> {
            visible_items(&items, tier).into_iter().map(|i| i.code).collect()
        };
        assert_eq!(codes(SubscriptionTier::Free), ["node"]);
        assert_eq!(codes(SubscriptionTier::Premium), ["node", "java"]);
        assert_eq!(codes(SubscriptionTier::PremiumPlus), ["node", "java", "go"]);
    }

    #[test]
    fn test_unknown_identity_is_free() {
        let resolver = EntitlementResolver::new();
        assert_eq!(resolver.current_tier(&IdentityKey::anonymous()), SubscriptionTier::Free);
        assert_eq!(resolver.entitlement(&IdentityKey::anonymous()).pending, None);
    }

    #[test]
    fn test_downgrade_applies_without_payment() {
        let resolver = EntitlementResolver::new();
        let id = IdentityKey::from_bearer("t");
        let tx = transaction("tx_1", &id, SubscriptionTier::PremiumPlus, true);
        resolver
            .change_tier(&id, SubscriptionTier::PremiumPlus, Some(&tx))
            .unwrap();

        let change = resolver.change_tier(&id, SubscriptionTier::Free, None).unwrap();
        assert_eq!(
            change,
            TierChange::Applied { from: SubscriptionTier::PremiumPlus, to: SubscriptionTier::Free }
        );
        assert_eq!(resolver.current_tier(&id), SubscriptionTier::Free);
    }

    #[test]
    fn test_upgrade_requires_payment() {
        let resolver = EntitlementResolver::new();
        let id = IdentityKey::from_bearer("t");

        assert_eq!(
            resolver.request_change(&id, SubscriptionTier::Premium),
            TierChange::PendingPayment { target: SubscriptionTier::Premium }
        );
        assert_eq!(resolver.current_tier(&id), SubscriptionTier::Free);

        let err = resolver.change_tier(&id, SubscriptionTier::Premium, None).unwrap_err();
        assert_eq!(err, GatewayError::PaymentFailed("payment required".into()));
        assert_eq!(resolver.current_tier(&id), SubscriptionTier::Free);
    }

    #[test]
    fn test_settle_applies_pending_upgrade() {
        let resolver = EntitlementResolver::new();
        let id = IdentityKey::from_bearer("t");
        resolver.request_change(&id, SubscriptionTier::Premium);

        let tx = transaction("tx_1", &id, SubscriptionTier::Premium, true);
        assert_eq!(
            resolver.settle(&id, &tx).unwrap(),
            TierChange::Applied { from: SubscriptionTier::Free, to: SubscriptionTier::Premium }
        );
        assert_eq!(resolver.current_tier(&id), SubscriptionTier::Premium);
        assert_eq!(resolver.entitlement(&id).pending, None);
    }

    #[test]
    fn test_failed_payment_leaves_tier() {
        let resolver = EntitlementResolver::new();
        let id = IdentityKey::from_bearer("t");
        let failed = transaction("tx_f", &id, SubscriptionTier::Premium, false);

        let err = resolver
            .change_tier(&id, SubscriptionTier::Premium, Some(&failed))
            .unwrap_err();
        assert_eq!(err, GatewayError::PaymentFailed("card declined".into()));
        assert_eq!(resolver.current_tier(&id), SubscriptionTier::Free);

        // a failed transaction is not consumed; a good one still works afterwards
        let ok = transaction("tx_ok", &id, SubscriptionTier::Premium, true);
        assert!(resolver.settle(&id, &ok).is_ok());
    }

    #[test]
    fn test_prune_keeps_paid_tiers() {
        let resolver = EntitlementResolver::new();
        let paid = IdentityKey::from_bearer("paid");
        let browsing = IdentityKey::from_bearer("browsing");
        let tx = transaction("tx_1", &paid, SubscriptionTier::Premium, true);

        resolver.change_tier(&paid, SubscriptionTier::Premium, Some(&tx)).unwrap();
        assert!(resolver.change_tier(&browsing, SubscriptionTier::Premium, None).is_err());
        assert_eq!(resolver.tracked_identities(), 2);

        assert_eq!(resolver.prune(|id| id == "tx_1"), 1);
        assert_eq!(resolver.tracked_identities(), 1);
        assert_eq!(resolver.current_tier(&paid), SubscriptionTier::Premium);

        // still live, so replay stays rejected
        resolver.change_tier(&paid, SubscriptionTier::Free, None).unwrap();
        assert!(resolver.change_tier(&paid, SubscriptionTier::Premium, Some(&tx)).is_err());

        assert_eq!(resolver.prune(|_| false), 2);
        assert_eq!(resolver.tracked_identities(), 0);
    }

    #[test]
    fn test_replayed_transaction_rejected() {
        let resolver = EntitlementResolver::new();
        let id = IdentityKey::from_bearer("t");
        let tx = transaction("tx_1", &id, SubscriptionTier::Premium, true);

        resolver.change_tier(&id, SubscriptionTier::Premium, Some(&tx)).unwrap();
        resolver.change_tier(&id, SubscriptionTier::Free, None).unwrap();

        let err = resolver
            .change_tier(&id, SubscriptionTier::Premium, Some(&tx))
            .unwrap_err();
        assert_eq!(err, GatewayError::PaymentFailed("transaction already consumed".into()));
        assert_eq!(resolver.current_tier(&id), SubscriptionTier::Free);
    }

    #[test]
    fn test_transaction_must_match_caller_and_tier() {
        let resolver = EntitlementResolver::new();
        let alice = IdentityKey::from_bearer("alice");
        let bob = IdentityKey::from_bearer("bob");

        let bobs = transaction("tx_b", &bob, SubscriptionTier::Premium, true);
        assert!(resolver.change_tier(&alice, SubscriptionTier::Premium, Some(&bobs)).is_err());

        let cheap = transaction("tx_a", &alice, SubscriptionTier::Premium, true);
        assert!(resolver
            .change_tier(&alice, SubscriptionTier::PremiumPlus, Some(&cheap))
            .is_err());
        assert_eq!(resolver.current_tier(&alice), SubscriptionTier::Free);
    }

    #[test]
    fn test_identities_are_isolated() {
        let resolver = EntitlementResolver::new();
        let alice = IdentityKey::from_bearer("alice");
        let tx = transaction("tx_a", &alice, SubscriptionTier::PremiumPlus, true);
        resolver
            .change_tier(&alice, SubscriptionTier::PremiumPlus, Some(&tx))
            .unwrap();

        assert_eq!(resolver.current_tier(&alice), SubscriptionTier::PremiumPlus);
        assert_eq!(resolver.current_tier(&IdentityKey::from_bearer("bob")), SubscriptionTier::Free);
    }
}
