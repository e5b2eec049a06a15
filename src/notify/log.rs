//! Notifier that writes events to the tracing log

use async_trait::async_trait;

use super::{DeliveryMode, NotificationContext, Notifier, NotifierError};

/// Logs sends at `warn` and clears at `info`
pub struct LogNotifier {
    name: String,
    mode: DeliveryMode,
}

impl LogNotifier {
    pub fn new(name: impl Into<String>, mode: DeliveryMode) -> Self {
        Self {
            name: name.into(),
            mode,
        }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new("log", DeliveryMode::Cooldown)
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> DeliveryMode {
        self.mode
    }

    async fn send(&self, ctx: &NotificationContext) -> Result<bool, NotifierError> {
        tracing::warn!(
            alert_id = ctx.alert.id,
            alert_name = %ctx.alert.name,
            notification = %ctx.notification.name,
            trigger = %ctx.trigger_name(),
            series = %ctx.series.identity(),
            value = ?ctx.value,
            fired_at = ctx.fired_at_ms,
            tracking_id = %ctx.tracking_id,
            "Alert notification"
        );
        ctx.audit.append(format!(
            "Logged notification `{}` for series `{}`.",
            ctx.notification.name,
            ctx.series.identity()
        ));
        Ok(true)
    }

    async fn clear(&self, ctx: &NotificationContext) -> Result<bool, NotifierError> {
        tracing::info!(
            alert_id = ctx.alert.id,
            alert_name = %ctx.alert.name,
            notification = %ctx.notification.name,
            trigger = %ctx.trigger_name(),
            series = %ctx.series.identity(),
            tracking_id = %ctx.tracking_id,
            "Alert cleared"
        );
        ctx.audit.append(format!(
            "Logged clear of `{}` for series `{}`.",
            ctx.notification.name,
            ctx.series.identity()
        ));
        Ok(true)
    }
}
