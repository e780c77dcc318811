//! Caller identity
//!
//! Per-caller state (windows, credits, tier) is keyed by an opaque
//! identity key. Bearer tokens are hashed before they become keys so raw
//! credentials never sit in maps or logs.

use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque key for per-caller state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn from_bearer(token: &str) -> Self {
        let digest = Sha256::digest(token.as_bytes());
        Self(format!("token:{}", &hex::encode(digest)[..16]))
    }

    pub fn from_client_addr(addr: &str) -> Self {
        Self(format!("ip:{addr}"))
    }

    pub fn anonymous() -> Self {
        Self("anonymous".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is calling, and whether they presented a credential
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    pub key: IdentityKey,
    credential: Option<String>,
}

impl RequestIdentity {
    /// Caller presenting a bearer credential; blank tokens count as absent
    pub fn bearer(token: &str, fallback_addr: Option<&str>) -> Self {
        let token = token.trim();
        if token.is_empty() {
            return Self::anonymous(fallback_addr);
        }
        Self {
            key: IdentityKey::from_bearer(token),
            credential: Some(token.to_string()),
        }
    }

    /// Caller without a credential, keyed by address when known
    pub fn anonymous(addr: Option<&str>) -> Self {
        let key = match addr.map(str::trim).filter(|a| !a.is_empty()) {
            Some(addr) => IdentityKey::from_client_addr(addr),
            None => IdentityKey::anonymous(),
        };
        Self { key, credential: None }
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }
}
