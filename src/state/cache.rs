//! Read-through cache over the notification state store
//!
//! Reads come from the last bulk snapshot while the most recent refresh
//! succeeded, and from the store directly otherwise. Writes always go to the
//! store; the cache picks them up on its next refresh, so cached reads lag
//! writes by at most one refresh period.

use std::sync::Arc;

use async_trait::async_trait;

use super::store::{NotificationState, NotificationStateStore, StateTables};
use super::StateError;
use crate::clock::Clock;
use crate::data::{Notification, NotificationId};
use crate::refresh::{RefreshStats, Refreshable, SnapshotCell};

pub struct NotificationStateCache {
    store: Arc<dyn NotificationStateStore>,
    snapshot: SnapshotCell<StateTables>,
    clock: Arc<dyn Clock>,
}

impl NotificationStateCache {
    pub fn new(store: Arc<dyn NotificationStateStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            snapshot: SnapshotCell::new(),
            clock,
        }
    }

    pub fn is_refreshed(&self) -> bool {
        self.snapshot.is_refreshed()
    }

    /// Current state of one notification
    pub async fn state_for(
        &self,
        notification_id: NotificationId,
    ) -> Result<NotificationState, StateError> {
        if self.snapshot.is_refreshed() {
            if let Some(tables) = self.snapshot.load() {
                return Ok(tables.get(&notification_id).cloned().unwrap_or_default());
            }
        }
        self.store.load(notification_id).await
    }

    /// Replace the notification's cooldown and active-status maps with the
    /// freshest available state
    pub async fn rehydrate(&self, notification: &mut Notification) -> Result<(), StateError> {
        let state = self.state_for(notification.id).await?;
        state.apply_to(notification);
        Ok(())
    }

    pub async fn set_cooldown_expiration(
        &self,
        notification_id: NotificationId,
        key: &str,
        expiration_ms: i64,
    ) -> Result<(), StateError> {
        self.store
            .set_cooldown_expiration(notification_id, key, expiration_ms)
            .await
    }

    pub async fn set_active(
        &self,
        notification_id: NotificationId,
        key: &str,
        active: bool,
    ) -> Result<(), StateError> {
        self.store.set_active(notification_id, key, active).await
    }

    pub fn stats(&self) -> RefreshStats {
        self.snapshot.stats()
    }
}

#[async_trait]
impl Refreshable for NotificationStateCache {
    fn name(&self) -> &'static str {
        "notification_state"
    }

    async fn refresh(&self) -> bool {
        match self.store.load_all().await {
            Ok(tables) => {
                tracing::debug!(notifications = tables.len(), "Notification state refreshed");
                self.snapshot.publish(tables, self.clock.now_ms());
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to refresh notification state");
                self.snapshot.mark_failed();
                false
            }
        }
    }
}
