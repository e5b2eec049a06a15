//! Queue payload carried from the scheduler to the evaluation workers

use serde::{Deserialize, Serialize};

use super::alert::AlertId;

/// An alert scheduled for one cron minute
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ScheduledTask {
    pub alert_id: AlertId,
    /// Minute the alert was enqueued for; anchors relative query windows
    pub enqueued_at_ms: i64,
}

impl ScheduledTask {
    pub fn new(alert_id: AlertId, enqueued_at_ms: i64) -> Self {
        Self {
            alert_id,
            enqueued_at_ms,
        }
    }
}
