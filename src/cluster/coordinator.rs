//! Lease coordination contract
//!
//! A lease is a time-bounded, renewable grant for a named purpose. Holding
//! the lease for a scheduling purpose is what allows a node to publish due
//! alerts for that purpose.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opaque token proving lease ownership
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseKey(pub String);

impl LeaseKey {
    pub fn random() -> Self {
        LeaseKey(format!("{:016x}", rand::random::<u64>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Distributed lock primitive
///
/// `Ok(None)` means the lease is held elsewhere (or was lost); callers treat
/// it exactly like an error: they do not hold the lease.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Obtain the lease for `purpose`, clobbering a holder whose lease has
    /// outlived `ttl_ms`
    async fn acquire_lease(
        &self,
        ttl_ms: i64,
        purpose: &str,
        note: &str,
    ) -> Result<Option<LeaseKey>, CoordinatorError>;

    /// Extend a held lease; returns the key to use from now on
    async fn refresh_lease(
        &self,
        purpose: &str,
        key: &LeaseKey,
        note: &str,
    ) -> Result<Option<LeaseKey>, CoordinatorError>;

    /// Give up a held lease; a no-op when `key` no longer owns it
    async fn release_lease(&self, purpose: &str, key: &LeaseKey) -> Result<(), CoordinatorError>;
}

/// Coordinator errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Coordinator unavailable: {0}")]
    Unavailable(String),

    #[error("Coordinator request timed out after {0}ms")]
    Timeout(u64),
}
