//! In-process lease coordinator
//!
//! Shared by every scheduler in one process (tests, single-node deployments).
//! A lease older than its TTL may be clobbered by the next acquirer; the
//! former holder then fails to refresh or release.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::coordinator::{Coordinator, CoordinatorError, LeaseKey};
use crate::clock::Clock;

#[derive(Debug, Clone)]
struct Lease {
    key: LeaseKey,
    note: String,
    lock_time_ms: i64,
    ttl_ms: i64,
}

pub struct InMemoryCoordinator {
    leases: Mutex<HashMap<String, Lease>>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

impl InMemoryCoordinator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate a coordinator outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Note of the current holder of `purpose`, if any
    pub fn holder(&self, purpose: &str) -> Option<String> {
        self.leases.lock().get(purpose).map(|l| l.note.clone())
    }

    fn check_available(&self) -> Result<(), CoordinatorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CoordinatorError::Unavailable("in-memory coordinator offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Coordinator for InMemoryCoordinator {
    async fn acquire_lease(
        &self,
        ttl_ms: i64,
        purpose: &str,
        note: &str,
    ) -> Result<Option<LeaseKey>, CoordinatorError> {
        self.check_available()?;
        let now = self.clock.now_ms();
        let mut leases = self.leases.lock();

        if let Some(existing) = leases.get(purpose) {
            if now - existing.lock_time_ms <= existing.ttl_ms {
                return Ok(None);
            }
            tracing::warn!(
                purpose = %purpose,
                previous_holder = %existing.note,
                "Lease expired, clobbering"
            );
        }

        let key = LeaseKey::random();
        leases.insert(
            purpose.to_string(),
            Lease {
                key: key.clone(),
                note: note.to_string(),
                lock_time_ms: now,
                ttl_ms,
            },
        );
        Ok(Some(key))
    }

    async fn refresh_lease(
        &self,
        purpose: &str,
        key: &LeaseKey,
        note: &str,
    ) -> Result<Option<LeaseKey>, CoordinatorError> {
        self.check_available()?;
        let now = self.clock.now_ms();
        let mut leases = self.leases.lock();

        match leases.get_mut(purpose) {
            Some(lease) if lease.key == *key => {
                let new_key = LeaseKey::random();
                lease.key = new_key.clone();
                lease.note = note.to_string();
                lease.lock_time_ms = now;
                Ok(Some(new_key))
            }
            _ => Ok(None),
        }
    }

    async fn release_lease(&self, purpose: &str, key: &LeaseKey) -> Result<(), CoordinatorError> {
        self.check_available()?;
        let mut leases = self.leases.lock();
        if leases.get(purpose).map(|l| l.key == *key).unwrap_or(false) {
            leases.remove(purpose);
        } else {
            tracing::debug!(purpose = %purpose, "Release ignored, lease not owned");
        }
        Ok(())
    }
}
