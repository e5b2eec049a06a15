//! Notification state store contract and an in-memory implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::StateError;
use crate::data::{Notification, NotificationId};

/// Cooldown and active-status maps of one notification, keyed by series key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationState {
    pub cooldown_expiration: HashMap<String, i64>,
    pub active_status: HashMap<String, bool>,
}

impl NotificationState {
    /// Copy this state onto a notification, replacing whatever it carried
    pub fn apply_to(&self, notification: &mut Notification) {
        notification.cooldown_expiration = self.cooldown_expiration.clone();
        notification.active_status = self.active_status.clone();
    }
}

/// Full bulk-read result: notification id to its state maps
pub type StateTables = HashMap<NotificationId, NotificationState>;

/// Durable per-(notification, series key) cooldown and active-status
#[async_trait]
pub trait NotificationStateStore: Send + Sync {
    /// Bulk read of every notification's state
    async fn load_all(&self) -> Result<StateTables, StateError>;

    /// Direct read of a single notification's state
    async fn load(&self, notification_id: NotificationId) -> Result<NotificationState, StateError>;

    async fn set_cooldown_expiration(
        &self,
        notification_id: NotificationId,
        key: &str,
        expiration_ms: i64,
    ) -> Result<(), StateError>;

    async fn set_active(
        &self,
        notification_id: NotificationId,
        key: &str,
        active: bool,
    ) -> Result<(), StateError>;
}

/// State store held in process memory
#[derive(Default)]
pub struct InMemoryNotificationStateStore {
    states: DashMap<NotificationId, NotificationState>,
    writes: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryNotificationStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage; every call fails while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of point writes accepted so far
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StateError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StateError::Store("notification state store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl NotificationStateStore for InMemoryNotificationStateStore {
    async fn load_all(&self) -> Result<StateTables, StateError> {
        self.check_available()?;
        Ok(self
            .states
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect())
    }

    async fn load(&self, notification_id: NotificationId) -> Result<NotificationState, StateError> {
        self.check_available()?;
        Ok(self
            .states
            .get(&notification_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn set_cooldown_expiration(
        &self,
        notification_id: NotificationId,
        key: &str,
        expiration_ms: i64,
    ) -> Result<(), StateError> {
        self.check_available()?;
        self.states
            .entry(notification_id)
            .or_default()
            .cooldown_expiration
            .insert(key.to_string(), expiration_ms);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_active(
        &self,
        notification_id: NotificationId,
        key: &str,
        active: bool,
    ) -> Result<(), StateError> {
        self.check_available()?;
        self.states
            .entry(notification_id)
            .or_default()
            .active_status
            .insert(key.to_string(), active);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
