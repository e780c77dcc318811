//! Usage Credits
//!
//! Prepaid request balances per caller identity. New identities start
//! with the configured allowance.

use dashmap::DashMap;

/// Credit ledger
pub struct CreditLedger {
    balances: DashMap<String, u64>,
    default_allowance: u64,
}

impl CreditLedger {
    pub fn new(default_allowance: u64) -> Self {
        Self {
            balances: DashMap::new(),
            default_allowance,
        }
    }

    /// Current balance; unknown identities report the default allowance
    pub fn balance(&self, identity: &str) -> u64 {
        self.balances
            .get(identity)
            .map(|b| *b)
            .unwrap_or(self.default_allowance)
    }

    /// Add credits, returning the new balance
    pub fn grant(&self, identity: &str, amount: u64) -> u64 {
        let mut balance = self
            .balances
            .entry(identity.to_string())
            .or_insert(self.default_allowance);
        *balance = balance.saturating_add(amount);
        *balance
    }

    /// Debit `cost` if the balance covers it
    pub fn try_debit(&self, identity: &str, cost: u64) -> Result<u64, CreditError> {
        let mut balance = self
            .balances
            .entry(identity.to_string())
            .or_insert(self.default_allowance);

        if *balance < cost {
            return Err(CreditError::InsufficientBalance {
                balance: *balance,
                required: cost,
            });
        }

        *balance -= cost;
        Ok(*balance)
    }
}

/// Credit error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditError {
    InsufficientBalance { balance: u64, required: u64 },
}

impl std::fmt::Display for CreditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientBalance { balance, required } => {
                write!(f, "Insufficient credit balance: {} < {}", balance, required)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debit_until_exhausted() {
        let ledger = CreditLedger::new(2);
        assert_eq!(ledger.balance("token:a"), 2);
        assert_eq!(ledger.try_debit("token:a", 1), Ok(1));
        assert_eq!(ledger.try_debit("token:a", 1), Ok(0));
        assert_eq!(
            ledger.try_debit("token:a", 1),
            Err(CreditError::InsufficientBalance { balance: 0, required: 1 })
        );
        assert_eq!(ledger.balance("token:a"), 0);
    }

    #[test]
    fn test_grant_tops_up() {
        let ledger = CreditLedger::new(0);
        assert_eq!(ledger.grant("token:a", 5), 5);
        assert_eq!(ledger.try_debit("token:a", 3), Ok(2));
        assert_eq!(ledger.balance("token:b"), 0);
    }
}
