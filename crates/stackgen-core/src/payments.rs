//! Payment Processing
//!
//! The payment processor is an external collaborator; the gateway ships a
//! simulated one. Every processed payment becomes a `PaymentTransaction`
//! that can later authorize exactly one tier upgrade.

use crate::{IdentityKey, SubscriptionTier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Purchasable subscription plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub id: &'static str,
    pub tier: SubscriptionTier,
    pub price: Decimal,
    pub currency: &'static str,
}

pub const PLANS: [Plan; 3] = [
    Plan { id: "free", tier: SubscriptionTier::Free, price: dec!(0.00), currency: "EUR" },
    Plan { id: "premium", tier: SubscriptionTier::Premium, price: dec!(9.00), currency: "EUR" },
    Plan { id: "premium-plus", tier: SubscriptionTier::PremiumPlus, price: dec!(19.00), currency: "EUR" },
];

/// Look up a plan by id
pub fn plan(plan_id: &str) -> Option<&'static Plan> {
    PLANS.iter().find(|p| p.id == plan_id)
}

/// Tier a plan grants; unknown plans grant nothing beyond Free
pub fn plan_tier(plan_id: &str) -> SubscriptionTier {
    plan(plan_id).map(|p| p.tier).unwrap_or_default()
}

/// Payment request as sent by the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub plan_id: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Payment outcome as returned to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Recorded payment, consumable once for a tier mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTransaction {
    pub transaction_id: String,
    #[serde(skip)]
    pub identity: IdentityKey,
    pub plan_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub resulting_tier: SubscriptionTier,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentTransaction {
    pub fn result(&self) -> PaymentResult {
        PaymentResult {
            success: self.success,
            transaction_id: Some(self.transaction_id.clone()),
            error: self.error.clone(),
        }
    }
}

/// Payment error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    UnknownPlan(String),
    AmountMismatch { expected: Decimal, got: Decimal },
    UnsupportedCurrency(String),
    Declined(String),
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownPlan(p) => write!(f, "Unknown plan: {}", p),
            Self::AmountMismatch { expected, got } => {
                write!(f, "Amount {} does not match plan price {}", got, expected)
            }
            Self::UnsupportedCurrency(c) => write!(f, "Unsupported currency: {}", c),
            Self::Declined(r) => write!(f, "Payment declined: {}", r),
        }
    }
}

/// External payment collaborator
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Charge for a plan; `Ok` only when the payment went through
    async fn charge(&self, request: &PaymentRequest) -> Result<(), PaymentError>;
}

/// Stand-in processor: validates the request against the plan list
pub struct SimulatedPaymentProcessor {
    latency: Duration,
    decline_reason: Option<String>,
}

impl SimulatedPaymentProcessor {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            decline_reason: None,
        }
    }

    /// Processor that declines every charge
    pub fn declining(reason: &str) -> Self {
        Self {
            latency: Duration::ZERO,
            decline_reason: Some(reason.to_string()),
        }
    }
}

impl Default for SimulatedPaymentProcessor {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl PaymentProcessor for SimulatedPaymentProcessor {
    async fn charge(&self, request: &PaymentRequest) -> Result<(), PaymentError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let plan = plan(&request.plan_id)
            .filter(|p| p.tier > SubscriptionTier::Free)
            .ok_or_else(|| PaymentError::UnknownPlan(request.plan_id.clone()))?;

        if !request.currency.eq_ignore_ascii_case(plan.currency) {
            return Err(PaymentError::UnsupportedCurrency(request.currency.clone()));
        }

        if request.amount != plan.price {
            return Err(PaymentError::AmountMismatch {
                expected: plan.price,
                got: request.amount,
            });
        }

        match &self.decline_reason {
            Some(reason) => Err(PaymentError::Declined(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Runs payments through the processor and keeps the transaction record
pub struct PaymentService {
    processor: Arc<dyn PaymentProcessor>,
    transactions: RwLock<HashMap<String, PaymentTransaction>>,
}

impl PaymentService {
    pub fn new(processor: Arc<dyn PaymentProcessor>) -> Self {
        Self {
            processor,
            transactions: RwLock::new(HashMap::new()),
        }
    }

    /// Process a payment for `identity` and record the outcome
    pub async fn pay(&self, identity: &IdentityKey, request: PaymentRequest) -> PaymentTransaction {
        let outcome = self.processor.charge(&request).await;

        let transaction = PaymentTransaction {
            transaction_id: new_transaction_id(),
            identity: identity.clone(),
            resulting_tier: plan_tier(&request.plan_id),
            plan_id: request.plan_id,
            amount: request.amount,
            currency: request.currency.to_uppercase(),
            success: outcome.is_ok(),
            error: outcome.err().map(|e| e.to_string()),
            created_at: Utc::now(),
        };

        if transaction.success {
            tracing::info!(
                identity = %identity,
                transaction_id = %transaction.transaction_id,
                plan = %transaction.plan_id,
                "payment succeeded"
            );
        } else {
            tracing::warn!(
                identity = %identity,
                plan = %transaction.plan_id,
                error = transaction.error.as_deref().unwrap_or_default(),
                "payment failed"
            );
        }

        self.transactions
            .write()
            .insert(transaction.transaction_id.clone(), transaction.clone());
        transaction
    }

    pub fn transaction(&self, transaction_id: &str) -> Option<PaymentTransaction> {
        self.transactions.read().get(transaction_id).cloned()
    }

    pub fn contains(&self, transaction_id: &str) -> bool {
        self.transactions.read().contains_key(transaction_id)
    }

    /// Forget transactions older than `max_age`, returning how many went
    pub fn prune(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let now = Utc::now();
        let mut transactions = self.transactions.write();
        let before = transactions.len();
        transactions.retain(|_, t| now.signed_duration_since(t.created_at) < max_age);
        before - transactions.len()
    }

    /// Transactions recorded for an identity, oldest first
    pub fn history(&self, identity: &IdentityKey) -> Vec<PaymentTransaction> {
        let mut history: Vec<_> = self
            .transactions
            .read()
            .values()
            .filter(|t| &t.identity == identity)
            .cloned()
            .collect();
        history.sort_by_key(|t| t.created_at);
        history
    }
}

fn new_transaction_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("tx_{}_{}", Utc::now().timestamp_millis(), &suffix[..9])
}
