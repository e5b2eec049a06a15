//! Notifier contract and built-in notifiers
//!
//! Concrete delivery channels live outside this crate; they plug in by
//! implementing [`Notifier`] and registering under the name a
//! [`Notification`] refers to.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dispatch::history::AuditTrail;
use crate::data::{AlertDefinition, Notification, Series, Trigger};

pub mod log;
pub mod recording;
pub mod registry;

pub use self::log::LogNotifier;
pub use recording::{NotifierEvent, NotifierEventKind, RecorderResponse, RecordingNotifier};
pub use registry::{NotifierRegistry, MISSING_DATA_NOTIFIER};

/// How a notifier interacts with cooldown and active-status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Send on activation and after each elapsed cooldown, clear once
    Cooldown,
    /// Stateful destination: send on every fired pass, clear on every
    /// non-fired pass
    EveryEvaluation,
    /// Report the latest datapoint on every pass; only valid without triggers
    LatestValue,
}

/// Everything a notifier needs to render and deliver one event
#[derive(Debug, Clone)]
pub struct NotificationContext {
    pub alert: Arc<AlertDefinition>,
    /// `None` for trigger-less and alert-level missing-data notifications
    pub trigger: Option<Trigger>,
    pub notification: Notification,
    pub fired_at_ms: i64,
    pub value: Option<f64>,
    pub series: Series,
    pub enqueued_at_ms: i64,
    /// `"{alert_id}_{enqueued_at_ms}"`, shared by every event of one evaluation
    pub tracking_id: String,
    pub audit: AuditTrail,
}

impl NotificationContext {
    pub fn trigger_name(&self) -> &str {
        self.trigger.as_ref().map(|t| t.name.as_str()).unwrap_or("-")
    }
}

/// A delivery channel
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Cooldown
    }

    /// Deliver a fired notification; `Ok(false)` means the channel declined
    async fn send(&self, ctx: &NotificationContext) -> Result<bool, NotifierError>;

    /// Deliver a clear notification
    async fn clear(&self, ctx: &NotificationContext) -> Result<bool, NotifierError>;
}

/// Notifier errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifierError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Unknown notifier: {0}")]
    Unknown(String),
}
