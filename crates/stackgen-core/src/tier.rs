//! Subscription tiers

use crate::GatewayError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordinal subscription level, serialized as its integer value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SubscriptionTier {
    #[default]
    Free = 0,
    Premium = 1,
    PremiumPlus = 2,
}

impl SubscriptionTier {
    pub const ALL: [SubscriptionTier; 3] = [Self::Free, Self::Premium, Self::PremiumPlus];

    pub fn level(self) -> u8 {
        self as u8
    }

    pub fn is_free(self) -> bool {
        self == Self::Free
    }

    pub fn is_premium(self) -> bool {
        self >= Self::Premium
    }

    pub fn is_premium_plus(self) -> bool {
        self == Self::PremiumPlus
    }
}

impl From<SubscriptionTier> for u8 {
    fn from(tier: SubscriptionTier) -> u8 {
        tier.level()
    }
}

impl TryFrom<u8> for SubscriptionTier {
    type Error = GatewayError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::Free),
            1 => Ok(Self::Premium),
            2 => Ok(Self::PremiumPlus),
            other => Err(GatewayError::BadRequest(format!("unknown tier level {other}"))),
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Premium => write!(f, "premium"),
            Self::PremiumPlus => write!(f, "premium-plus"),
        }
    }
}

/// Whether `tier` is entitled to something that requires `required`
pub fn can_access(tier: SubscriptionTier, required: SubscriptionTier) -> bool {
    tier >= required
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&SubscriptionTier::PremiumPlus).unwrap(), "2");
        let tier: SubscriptionTier = serde_json::from_str("1").unwrap();
        assert_eq!(tier, SubscriptionTier::Premium);
        assert!(serde_json::from_str::<SubscriptionTier>("3").is_err());
    }

    #[test]
    fn test_flags() {
        assert!(SubscriptionTier::Free.is_free());
        assert!(SubscriptionTier::PremiumPlus.is_premium());
        assert!(!SubscriptionTier::Premium.is_premium_plus());
    }

    proptest! {
        #[test]
        fn can_access_is_monotonic(tier in 0u8..3, required in 0u8..3) {
            let tier = SubscriptionTier::try_from(tier).unwrap();
            let required = SubscriptionTier::try_from(required).unwrap();
            prop_assert_eq!(can_access(tier, required), tier.level() >= required.level());
            for higher in SubscriptionTier::ALL.iter().filter(|t| **t > tier) {
                if can_access(tier, required) {
                    prop_assert!(can_access(*higher, required));
                }
            }
        }
    }
}
