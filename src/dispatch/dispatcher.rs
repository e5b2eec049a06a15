//! Notification dispatcher
//!
//! Evaluates one scheduled alert end to end: resolve the expression, run the
//! referenced triggers over every series, walk the cooldown/active-status
//! table per (notification, trigger, series), call notifiers and write a
//! history entry. Every failure is contained to the alert being evaluated.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;

use super::history::{AuditTrail, HistoryEntry, HistoryLog, JobStatus};
use super::stats::{EvaluationStats, EvaluationStatsSnapshot};
use super::EvaluationError;
use crate::catalog::{AlertStore, CatalogError};
use crate::clock::Clock;
use crate::data::{
    AlertDefinition, AlertId, Notification, NotificationId, ScheduledTask, Series, Trigger, TriggerId,
};
use crate::evaluate::{decide, fired_at, Decision};
use crate::notify::{DeliveryMode, NotificationContext, Notifier, NotifierRegistry, MISSING_DATA_NOTIFIER};
use crate::source::{query_with_timeout, MetricDataSource, QueryWindow};
use crate::state::{NotificationStateCache, StateError};

/// Decides whether an alert's data is too stale to evaluate
#[async_trait]
pub trait DataLagGate: Send + Sync {
    async fn is_lagging(&self, alert: &AlertDefinition) -> bool;
}

/// Gate that never reports lag
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDataLag;

#[async_trait]
impl DataLagGate for NoDataLag {
    async fn is_lagging(&self, _alert: &AlertDefinition) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Upper bound on one metric query
    pub query_timeout: Duration,
    /// Start latency after which an evaluation counts as delayed
    pub evaluation_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(20),
            evaluation_delay: Duration::from_secs(60),
        }
    }
}

/// Result of evaluating one scheduled alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationOutcome {
    pub alert_id: AlertId,
    pub tracking_id: String,
    pub status: JobStatus,
    pub notifications_sent: usize,
    pub notifications_cleared: usize,
}

pub struct NotificationDispatcher {
    alerts: Arc<dyn AlertStore>,
    state: Arc<NotificationStateCache>,
    source: Arc<dyn MetricDataSource>,
    notifiers: NotifierRegistry,
    lag_gate: Arc<dyn DataLagGate>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
    stats: EvaluationStats,
    history: HistoryLog,
}

/// Per-evaluation context shared by every notification of one alert
struct Pass {
    alert: Arc<AlertDefinition>,
    enqueued_at_ms: i64,
    now_ms: i64,
    tracking_id: String,
    audit: AuditTrail,
    sent: AtomicUsize,
    cleared: AtomicUsize,
}

impl Pass {
    fn context(
        &self,
        trigger: Option<&Trigger>,
        notification: &Notification,
        fired_at_ms: i64,
        value: Option<f64>,
        series: &Series,
    ) -> NotificationContext {
        NotificationContext {
            alert: self.alert.clone(),
            trigger: trigger.cloned(),
            notification: notification.clone(),
            fired_at_ms,
            value,
            series: series.clone(),
            enqueued_at_ms: self.enqueued_at_ms,
            tracking_id: self.tracking_id.clone(),
            audit: self.audit.clone(),
        }
    }
}

/// Stand-in series for events raised when the expression returned nothing
fn missing_data_series() -> Series {
    Series::new("unknown", "unknown")
}

impl NotificationDispatcher {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        state: Arc<NotificationStateCache>,
        source: Arc<dyn MetricDataSource>,
        notifiers: NotifierRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            alerts,
            state,
            source,
            notifiers,
            lag_gate: Arc::new(NoDataLag),
            clock,
            config: DispatcherConfig::default(),
            stats: EvaluationStats::default(),
            history: HistoryLog::default(),
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_lag_gate(mut self, gate: Arc<dyn DataLagGate>) -> Self {
        self.lag_gate = gate;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history = HistoryLog::new(capacity);
        self
    }

    pub fn stats(&self) -> EvaluationStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Evaluate a single scheduled alert
    pub async fn evaluate(&self, task: ScheduledTask) -> EvaluationOutcome {
        let alert = self
            .alerts
            .find_by_ids(&[task.alert_id])
            .await
            .map(|found| found.into_iter().find(|a| a.id == task.alert_id));
        self.evaluate_loaded(task, alert).await
    }

    /// Evaluate a dequeued batch
    ///
    /// Each alert id is evaluated once. When the batch carries several
    /// enqueue timestamps for one id, the latest is used and the duplicate
    /// is counted as a failure.
    pub async fn evaluate_batch(&self, tasks: Vec<ScheduledTask>) -> Vec<EvaluationOutcome> {
        let mut order: Vec<AlertId> = Vec::with_capacity(tasks.len());
        let mut anchors: HashMap<AlertId, i64> = HashMap::with_capacity(tasks.len());

        for task in tasks {
            if let Some(existing) = anchors.get_mut(&task.alert_id) {
                tracing::warn!(
                    alert_id = task.alert_id,
                    previous = *existing,
                    current = task.enqueued_at_ms,
                    "Multiple enqueue timestamps for alert in one batch, using the latest"
                );
                EvaluationStats::incr(&self.stats.failed);
                *existing = (*existing).max(task.enqueued_at_ms);
            } else {
                anchors.insert(task.alert_id, task.enqueued_at_ms);
                order.push(task.alert_id);
            }
        }
        if order.is_empty() {
            return Vec::new();
        }

        let mut lookup = self
            .alerts
            .find_by_ids(&order)
            .await
            .map(|found| found.into_iter().map(|a| (a.id, a)).collect::<HashMap<_, _>>());
        if let Err(e) = &lookup {
            tracing::error!(error = %e, alerts = order.len(), "Failed to load alerts for batch");
        }

        let mut outcomes = Vec::with_capacity(order.len());
        for alert_id in order {
            let enqueued_at_ms = anchors.get(&alert_id).copied().unwrap_or_default();
            let alert = match &mut lookup {
                Ok(found) => Ok(found.remove(&alert_id)),
                Err(e) => Err(e.clone()),
            };
            outcomes.push(
                self.evaluate_loaded(ScheduledTask::new(alert_id, enqueued_at_ms), alert)
                    .await,
            );
        }
        outcomes
    }

    async fn evaluate_loaded(
        &self,
        task: ScheduledTask,
        alert: Result<Option<AlertDefinition>, CatalogError>,
    ) -> EvaluationOutcome {
        let timer = Instant::now();
        let started_at_ms = self.clock.now_ms();
        let tracking_id = format!("{}_{}", task.alert_id, task.enqueued_at_ms);
        let audit = AuditTrail::new();

        let (status, sent, cleared) = match self
            .run(&task, alert, started_at_ms, &tracking_id, &audit)
            .await
        {
            Ok((status, sent, cleared)) => (status, sent, cleared),
            Err(e) => {
                tracing::warn!(alert_id = task.alert_id, error = %e, "Alert evaluation failed");
                audit.append(format!("Evaluation failed: {}", e));
                (JobStatus::Failure, 0, 0)
            }
        };

        match status {
            JobStatus::Success => EvaluationStats::incr(&self.stats.evaluated),
            JobStatus::Failure => EvaluationStats::incr(&self.stats.failed),
            JobStatus::Skipped => EvaluationStats::incr(&self.stats.skipped),
        }

        let latency_ms = timer.elapsed().as_millis() as u64;
        tracing::debug!(
            alert_id = task.alert_id,
            status = ?status,
            latency_ms,
            sent,
            cleared,
            "Alert evaluated"
        );
        self.history.record(HistoryEntry {
            alert_id: task.alert_id,
            tracking_id: tracking_id.clone(),
            status,
            started_at_ms,
            latency_ms,
            messages: audit.lines(),
        });

        EvaluationOutcome {
            alert_id: task.alert_id,
            tracking_id,
            status,
            notifications_sent: sent,
            notifications_cleared: cleared,
        }
    }

    async fn run(
        &self,
        task: &ScheduledTask,
        alert: Result<Option<AlertDefinition>, CatalogError>,
        now_ms: i64,
        tracking_id: &str,
        audit: &AuditTrail,
    ) -> Result<(JobStatus, usize, usize), EvaluationError> {
        let alert = match alert? {
            Some(alert) if alert.is_schedulable() => Arc::new(alert),
            Some(_) => return Err(EvaluationError::Disabled(task.alert_id)),
            None => return Err(EvaluationError::NotFound(task.alert_id)),
        };
        if alert.notifications.is_empty() {
            return Err(EvaluationError::NoNotifications(task.alert_id));
        }

        let delay_ms = now_ms - task.enqueued_at_ms;
        if delay_ms > self.config.evaluation_delay.as_millis() as i64 {
            EvaluationStats::incr(&self.stats.delayed);
            tracing::warn!(alert_id = alert.id, delay_ms, "Alert evaluation started late");
            audit.append(format!("Evaluation started {}ms after enqueue.", delay_ms));
        }

        if self.lag_gate.is_lagging(&alert).await {
            tracing::info!(alert_id = alert.id, "Skipping alert evaluation due to data lag");
            audit.append("Skipping evaluation as data was lagging.");
            return Ok((JobStatus::Skipped, 0, 0));
        }

        let mut notifications = alert.notifications.clone();
        for notification in notifications.iter_mut() {
            self.state.rehydrate(notification).await?;
        }

        let pass = Pass {
            alert: alert.clone(),
            enqueued_at_ms: task.enqueued_at_ms,
            now_ms,
            tracking_id: tracking_id.to_string(),
            audit: audit.clone(),
            sent: AtomicUsize::new(0),
            cleared: AtomicUsize::new(0),
        };

        let result = query_with_timeout(
            self.source.as_ref(),
            &alert.expression,
            task.enqueued_at_ms,
            self.config.query_timeout,
        )
        .await;

        match result {
            Ok(series) if series.iter().all(Series::is_empty) => {
                self.on_missing_data(&pass, &mut notifications).await;
            }
            Ok(series) => {
                let window = QueryWindow::from_expression(&alert.expression, task.enqueued_at_ms);
                self.on_data(&pass, &mut notifications, &series, window).await;
            }
            Err(e) if e.is_missing_data() => {
                audit.append(format!("Missing data exception: {}", e));
                self.on_missing_data(&pass, &mut notifications).await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        }

        Ok((
            JobStatus::Success,
            pass.sent.load(Ordering::Relaxed),
            pass.cleared.load(Ordering::Relaxed),
        ))
    }

    async fn on_missing_data(&self, pass: &Pass, notifications: &mut [Notification]) {
        let alert = &pass.alert;
        let placeholder = missing_data_series();

        if alert.missing_data_notification {
            let notification = Notification::new(
                0,
                alert.id,
                format!("{} missing data", alert.name),
                MISSING_DATA_NOTIFIER,
                0,
            )
            .with_subscription(alert.owner.clone());
            match self.notifiers.get(MISSING_DATA_NOTIFIER) {
                Ok(notifier) => {
                    let ctx = pass.context(None, &notification, pass.now_ms, None, &placeholder);
                    self.deliver(pass, &notifier, &ctx, false).await;
                    pass.audit.append(format!(
                        "Metric data does not exist for alert expression: {}. Sent notification for missing data.",
                        alert.expression
                    ));
                }
                Err(e) => {
                    EvaluationStats::incr(&self.stats.notifier_failures);
                    tracing::warn!(alert_id = alert.id, error = %e, "No missing-data notifier registered");
                    pass.audit.append(format!("Could not send missing data notification: {}", e));
                }
            }
        } else {
            pass.audit.append(format!(
                "Metric data does not exist for alert expression: {}. Missing data notification is disabled.",
                alert.expression
            ));
        }

        for notification in notifications.iter_mut().filter(|n| n.has_triggers()) {
            let Some(notifier) = self.notifier_for(pass, notification) else {
                continue;
            };
            let no_data_triggers: Vec<&Trigger> = notification
                .trigger_ids
                .iter()
                .filter_map(|id| alert.trigger(*id))
                .filter(|t| t.is_no_data())
                .collect();
            if no_data_triggers.is_empty() {
                continue;
            }
            if notifier.mode() == DeliveryMode::LatestValue {
                pass.audit.append(format!(
                    "Latest-value notifiers must not be associated with no-data triggers. Name: `{}`",
                    notification.name
                ));
                continue;
            }
            for trigger in no_data_triggers {
                EvaluationStats::incr(&self.stats.triggers_violated);
                pass.audit.append(format!(
                    "The trigger `{}` was evaluated and it is fired as data for the metric expression `{}` does not exist.",
                    trigger.name, alert.expression
                ));
                self.apply(pass, &notifier, notification, trigger, &placeholder, Some(pass.now_ms), None)
                    .await;
            }
        }
    }

    async fn on_data(
        &self,
        pass: &Pass,
        notifications: &mut [Notification],
        series: &[Series],
        window: QueryWindow,
    ) {
        let alert = pass.alert.clone();

        let mut fired: HashMap<TriggerId, Vec<Option<i64>>> = HashMap::new();
        for trigger in alert.referenced_triggers() {
            let times: Vec<Option<i64>> = series
                .iter()
                .map(|s| fired_at(trigger, &s.datapoints, window))
                .collect();
            let violations = times.iter().filter(|t| t.is_some()).count();
            for _ in 0..violations {
                EvaluationStats::incr(&self.stats.triggers_violated);
            }
            fired.insert(trigger.id, times);
        }

        let placeholder = missing_data_series();
        for notification in notifications.iter_mut() {
            let Some(notifier) = self.notifier_for(pass, notification) else {
                continue;
            };

            if !notification.has_triggers() {
                if notifier.mode() == DeliveryMode::LatestValue {
                    for s in series {
                        if let Some((ts, value)) = s.latest() {
                            let ctx = pass.context(None, notification, ts, Some(value), s);
                            self.deliver(pass, &notifier, &ctx, false).await;
                        }
                    }
                } else {
                    tracing::debug!(notification = %notification.name, "Notification has no triggers");
                    pass.audit
                        .append(format!("The notification `{}` has no triggers.", notification.name));
                }
                continue;
            }

            if notifier.mode() == DeliveryMode::LatestValue {
                tracing::info!(notification = %notification.name, "Latest-value notifier attached to triggers, ignoring");
                pass.audit.append(format!(
                    "Latest-value notifiers must not be associated with triggers. Name: `{}`",
                    notification.name
                ));
                continue;
            }

            for trigger_id in notification.trigger_ids.clone() {
                let Some(trigger) = alert.trigger(trigger_id) else {
                    tracing::warn!(
                        alert_id = alert.id,
                        trigger_id,
                        notification = %notification.name,
                        "Notification references an unknown trigger"
                    );
                    continue;
                };
                let times = fired.get(&trigger_id).cloned().unwrap_or_default();
                for (s, fired_ts) in series.iter().zip(times) {
                    let value = fired_ts.and_then(|ts| s.datapoints.get(&ts).copied());
                    let verdict = if fired_ts.is_some() { "fired" } else { "not fired" };
                    pass.audit.append(format!(
                        "The trigger `{}` was evaluated against series `{}` and it is {}.",
                        trigger.name,
                        s.identity(),
                        verdict
                    ));
                    self.apply(pass, &notifier, notification, trigger, s, fired_ts, value)
                        .await;
                }
                if trigger.is_no_data() {
                    // data exists again, so clear a previous no-data event
                    self.apply(pass, &notifier, notification, trigger, &placeholder, None, None)
                        .await;
                }
            }
        }
    }

    /// Walk the decision table for one (notification, trigger, series)
    ///
    /// A failed state write abandons only this unit; the event is not
    /// delivered and the pass moves on to the next one.
    #[allow(clippy::too_many_arguments)]
    async fn apply(
        &self,
        pass: &Pass,
        notifier: &Arc<dyn Notifier>,
        notification: &mut Notification,
        trigger: &Trigger,
        series: &Series,
        fired_ts: Option<i64>,
        value: Option<f64>,
    ) {
        let key = series.state_key(trigger.id);
        let now = pass.now_ms;
        let decision = decide(
            notifier.mode(),
            fired_ts.is_some(),
            notification.is_active(&key),
            notification.is_on_cooldown(&key, now),
        );

        match decision {
            Decision::Activate | Decision::Resend => {
                let expiration = (now + notification.cooldown_period_ms)
                    .max(notification.cooldown_expiration_for(&key));
                let activate = (decision == Decision::Activate).then_some(true);
                if let Err(e) = self.persist(notification.id, &key, activate, expiration).await {
                    self.state_write_failed(pass, notification, &key, &e);
                    return;
                }
                if decision == Decision::Activate {
                    notification.set_active(&key, true);
                }
                notification.set_cooldown_expiration(&key, expiration);

                let ctx = pass.context(Some(trigger), notification, fired_ts.unwrap_or(now), value, series);
                if self.deliver(pass, notifier, &ctx, false).await {
                    pass.audit.append(format!(
                        "Sent alert notification and updated the cooldown: {}",
                        expiration
                    ));
                }
            }
            Decision::OnCooldown => {
                EvaluationStats::incr(&self.stats.on_cooldown);
                let until = notification.cooldown_expiration_for(&key);
                tracing::debug!(
                    alert_id = pass.alert.id,
                    notification = %notification.name,
                    key = %key,
                    until,
                    "Notification on cooldown"
                );
                pass.audit.append(format!(
                    "The notification `{}` is on cooldown until {}.",
                    notification.name, until
                ));
            }
            Decision::Clear => {
                if let Err(e) = self.persist(notification.id, &key, Some(false), now).await {
                    self.state_write_failed(pass, notification, &key, &e);
                    return;
                }
                notification.set_active(&key, false);
                notification.set_cooldown_expiration(&key, now);

                let ctx = pass.context(Some(trigger), notification, now, None, series);
                if self.deliver(pass, notifier, &ctx, true).await {
                    pass.audit
                        .append(format!("The notification `{}` was cleared.", notification.name));
                }
            }
            Decision::SendStateless => {
                let ctx = pass.context(Some(trigger), notification, fired_ts.unwrap_or(now), value, series);
                self.deliver(pass, notifier, &ctx, false).await;
            }
            Decision::ClearStateless => {
                let ctx = pass.context(Some(trigger), notification, now, None, series);
                self.deliver(pass, notifier, &ctx, true).await;
            }
            Decision::Idle => {}
        }
    }

    async fn persist(
        &self,
        notification_id: NotificationId,
        key: &str,
        active: Option<bool>,
        expiration_ms: i64,
    ) -> Result<(), StateError> {
        if let Some(active) = active {
            self.state.set_active(notification_id, key, active).await?;
        }
        self.state
            .set_cooldown_expiration(notification_id, key, expiration_ms)
            .await
    }

    fn state_write_failed(&self, pass: &Pass, notification: &Notification, key: &str, e: &StateError) {
        EvaluationStats::incr(&self.stats.state_write_failures);
        tracing::error!(
            alert_id = pass.alert.id,
            notification = %notification.name,
            key = %key,
            error = %e,
            "Failed to persist notification state"
        );
        pass.audit.append(format!(
            "Could not update the state of notification `{}`: {}",
            notification.name, e
        ));
    }

    fn notifier_for(&self, pass: &Pass, notification: &Notification) -> Option<Arc<dyn Notifier>> {
        match self.notifiers.get(&notification.notifier) {
            Ok(notifier) => Some(notifier),
            Err(e) => {
                EvaluationStats::incr(&self.stats.notifier_failures);
                tracing::warn!(
                    alert_id = pass.alert.id,
                    notification = %notification.name,
                    error = %e,
                    "Skipping notification"
                );
                pass.audit
                    .append(format!("Skipped notification `{}`: {}", notification.name, e));
                None
            }
        }
    }

    /// Call the notifier; errors and panics count as a declined delivery
    async fn deliver(
        &self,
        pass: &Pass,
        notifier: &Arc<dyn Notifier>,
        ctx: &NotificationContext,
        clear: bool,
    ) -> bool {
        let call = async {
            if clear {
                notifier.clear(ctx).await
            } else {
                notifier.send(ctx).await
            }
        };
        let action = if clear { "clear" } else { "send" };

        let delivered = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(delivered)) => delivered,
            Ok(Err(e)) => {
                tracing::warn!(
                    alert_id = pass.alert.id,
                    notifier = notifier.name(),
                    action,
                    error = %e,
                    "Notifier failed"
                );
                false
            }
            Err(_) => {
                tracing::error!(
                    alert_id = pass.alert.id,
                    notifier = notifier.name(),
                    action,
                    "Notifier panicked"
                );
                false
            }
        };

        if delivered {
            if clear {
                EvaluationStats::incr(&self.stats.notifications_cleared);
                pass.cleared.fetch_add(1, Ordering::Relaxed);
            } else {
                EvaluationStats::incr(&self.stats.notifications_sent);
                pass.sent.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            EvaluationStats::incr(&self.stats.notifier_failures);
            pass.audit.append(format!(
                "Failed to {} notification to {}",
                action,
                notifier.name()
            ));
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryAlertStore;
    use crate::clock::ManualClock;
    use crate::data::TriggerType;
    use crate::notify::{NotifierEventKind, RecorderResponse, RecordingNotifier};
    use crate::source::{InMemoryMetricSource, SourceError};
    use crate::state::{
        InMemoryNotificationStateStore, NotificationState, NotificationStateStore, StateTables,
    };

    const T0: i64 = 1_700_000_040_000;
    const MINUTE: i64 = 60_000;

    struct Harness {
        clock: Arc<ManualClock>,
        alerts: Arc<InMemoryAlertStore>,
        state_store: Arc<InMemoryNotificationStateStore>,
        source: Arc<InMemoryMetricSource>,
        recorder: Arc<RecordingNotifier>,
        stateless: Arc<RecordingNotifier>,
        latest: Arc<RecordingNotifier>,
        missing: Arc<RecordingNotifier>,
        dispatcher: NotificationDispatcher,
    }

    fn harness() -> Harness {
        let clock = ManualClock::new(T0);
        let alerts = Arc::new(InMemoryAlertStore::new());
        let state_store = Arc::new(InMemoryNotificationStateStore::new());
        let state = Arc::new(NotificationStateCache::new(state_store.clone(), clock.clone()));
        let source = Arc::new(InMemoryMetricSource::new());

        let recorder = Arc::new(RecordingNotifier::new("recorder", DeliveryMode::Cooldown));
        let stateless = Arc::new(RecordingNotifier::new("stateless", DeliveryMode::EveryEvaluation));
        let latest = Arc::new(RecordingNotifier::new("latest", DeliveryMode::LatestValue));
        let missing = Arc::new(RecordingNotifier::new(MISSING_DATA_NOTIFIER, DeliveryMode::Cooldown));
        let mut registry = NotifierRegistry::new();
        registry.register(recorder.clone());
        registry.register(stateless.clone());
        registry.register(latest.clone());
        registry.register(missing.clone());

        let dispatcher = NotificationDispatcher::new(
            alerts.clone(),
            state,
            source.clone(),
            registry,
            clock.clone(),
        );
        Harness {
            clock,
            alerts,
            state_store,
            source,
            recorder,
            stateless,
            latest,
            missing,
            dispatcher,
        }
    }

    fn threshold_alert(notifier: &str) -> AlertDefinition {
        AlertDefinition::new(1, "cpu high", "*/1 * * * *", "-10m:host:cpu")
            .with_owner("ops")
            .with_trigger(Trigger::new(10, 1, "above 10", TriggerType::GreaterThan, 10.0))
            .with_notification(Notification::new(100, 1, "page", notifier, 300_000).with_trigger(10))
    }

    async fn evaluate_at(h: &Harness, now: i64) -> EvaluationOutcome {
        h.clock.set(now);
        h.dispatcher.evaluate(ScheduledTask::new(1, now)).await
    }

    #[tokio::test]
    async fn test_cooldown_scenario() {
        let h = harness();
        h.alerts.upsert(threshold_alert("recorder")).await.unwrap();
        h.source.push(
            Series::new("host", "cpu")
                .with_datapoint(T0, 5.0)
                .with_datapoint(T0 + MINUTE, 15.0),
        );

        let first = evaluate_at(&h, T0 + MINUTE).await;
        assert_eq!(first.status, JobStatus::Success);
        assert_eq!(first.notifications_sent, 1);
        let events = h.recorder.events();
        assert_eq!(events[0].fired_at_ms, T0 + MINUTE);
        assert_eq!(events[0].value, Some(15.0));

        let key = Series::new("host", "cpu").state_key(10);
        let state = h.state_store.load(100).await.unwrap();
        assert_eq!(state.active_status.get(&key), Some(&true));
        assert_eq!(state.cooldown_expiration.get(&key), Some(&(T0 + MINUTE + 300_000)));

        let second = evaluate_at(&h, T0 + 2 * MINUTE).await;
        assert_eq!(second.notifications_sent, 0);
        assert_eq!(h.recorder.sends(), 1);
        assert_eq!(h.dispatcher.stats().on_cooldown, 1);
        let entry = &h.dispatcher.history().recent(1)[0];
        assert!(entry.message().contains("on cooldown"));

        h.source.push(Series::new("host", "cpu").with_datapoint(T0 + 7 * MINUTE, 15.0));
        let third = evaluate_at(&h, T0 + 7 * MINUTE).await;
        assert_eq!(third.notifications_sent, 1);
        assert_eq!(h.recorder.sends(), 2);
        let state = h.state_store.load(100).await.unwrap();
        assert_eq!(
            state.cooldown_expiration.get(&key),
            Some(&(T0 + 7 * MINUTE + 300_000))
        );
    }

    #[tokio::test]
    async fn test_clear_then_idempotent_clear() {
        let h = harness();
        h.alerts.upsert(threshold_alert("recorder")).await.unwrap();
        h.source.push(Series::new("host", "cpu").with_datapoint(T0, 15.0));
        evaluate_at(&h, T0).await;
        assert_eq!(h.recorder.sends(), 1);

        h.source.clear();
        h.source.push(Series::new("host", "cpu").with_datapoint(T0 + MINUTE, 1.0));
        let cleared = evaluate_at(&h, T0 + MINUTE).await;
        assert_eq!(cleared.notifications_cleared, 1);

        let key = Series::new("host", "cpu").state_key(10);
        let state = h.state_store.load(100).await.unwrap();
        assert_eq!(state.active_status.get(&key), Some(&false));
        assert_eq!(state.cooldown_expiration.get(&key), Some(&(T0 + MINUTE)));

        let writes = h.state_store.writes();
        h.source.push(Series::new("host", "cpu").with_datapoint(T0 + 2 * MINUTE, 1.0));
        let again = evaluate_at(&h, T0 + 2 * MINUTE).await;
        assert_eq!(again.notifications_cleared, 0);
        assert_eq!(h.recorder.clears(), 1);
        assert_eq!(h.state_store.writes(), writes);
    }

    #[tokio::test]
    async fn test_reactivation_after_clear_ignores_cooldown() {
        let h = harness();
        h.alerts.upsert(threshold_alert("recorder")).await.unwrap();
        h.source.push(Series::new("host", "cpu").with_datapoint(T0, 15.0));
        evaluate_at(&h, T0).await;

        h.source.clear();
        h.source.push(Series::new("host", "cpu").with_datapoint(T0 + MINUTE, 1.0));
        evaluate_at(&h, T0 + MINUTE).await;

        h.source.clear();
        h.source.push(Series::new("host", "cpu").with_datapoint(T0 + 2 * MINUTE, 20.0));
        let outcome = evaluate_at(&h, T0 + 2 * MINUTE).await;
        assert_eq!(outcome.notifications_sent, 1);
        let kinds: Vec<_> = h.recorder.events().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![NotifierEventKind::Send, NotifierEventKind::Clear, NotifierEventKind::Send]
        );
    }

    #[tokio::test]
    async fn test_every_evaluation_notifier_ignores_cooldown() {
        let h = harness();
        h.alerts.upsert(threshold_alert("stateless")).await.unwrap();
        h.source.push(Series::new("host", "cpu").with_datapoint(T0, 15.0));
        evaluate_at(&h, T0).await;
        evaluate_at(&h, T0 + MINUTE).await;
        assert_eq!(h.stateless.sends(), 2);
        assert_eq!(h.state_store.writes(), 0);

        h.source.clear();
        h.source.push(Series::new("host", "cpu").with_datapoint(T0 + 2 * MINUTE, 1.0));
        evaluate_at(&h, T0 + 2 * MINUTE).await;
        assert_eq!(h.stateless.clears(), 1);
    }

    #[tokio::test]
    async fn test_per_series_state() {
        let h = harness();
        h.alerts.upsert(threshold_alert("recorder")).await.unwrap();
        h.source.push(Series::new("host", "cpu").with_tag("host", "a").with_datapoint(T0, 15.0));
        h.source.push(Series::new("host", "cpu").with_tag("host", "b").with_datapoint(T0, 2.0));

        let outcome = evaluate_at(&h, T0).await;
        assert_eq!(outcome.notifications_sent, 1);
        assert_eq!(h.recorder.events()[0].series, "host:cpu{host=a}");
        assert_eq!(h.dispatcher.stats().triggers_violated, 1);
    }

    #[tokio::test]
    async fn test_missing_data_path() {
        let h = harness();
        let alert = threshold_alert("recorder")
            .with_missing_data_notification(true)
            .with_trigger(Trigger::new(11, 1, "no data", TriggerType::NoData, 0.0).with_inertia(MINUTE))
            .with_notification(Notification::new(101, 1, "silence", "recorder", 600_000).with_trigger(11));
        h.alerts.upsert(alert).await.unwrap();

        let outcome = evaluate_at(&h, T0).await;
        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(h.missing.sends(), 1);
        assert_eq!(h.missing.events()[0].notification_id, 0);

        let events = h.recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].trigger_id, Some(11));
        assert_eq!(events[0].series, "unknown:unknown");
        assert_eq!(events[0].fired_at_ms, T0);

        // data is back: the no-data event clears
        h.source.push(Series::new("host", "cpu").with_datapoint(T0 + MINUTE, 1.0));
        let outcome = evaluate_at(&h, T0 + MINUTE).await;
        assert_eq!(outcome.notifications_cleared, 1);
        assert_eq!(h.recorder.clears(), 1);
    }

    #[tokio::test]
    async fn test_missing_data_error_still_runs_missing_path() {
        let h = harness();
        h.alerts
            .upsert(threshold_alert("recorder").with_missing_data_notification(true))
            .await
            .unwrap();
        h.source
            .set_failure(Some(SourceError::MissingData("host:cpu".into())));

        let outcome = evaluate_at(&h, T0).await;
        assert_eq!(outcome.status, JobStatus::Failure);
        assert_eq!(h.missing.sends(), 1);
        assert_eq!(h.dispatcher.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_skips_unusable_alerts() {
        let h = harness();
        h.alerts
            .upsert(
                AlertDefinition::new(2, "empty", "* * * * *", "-1h:host:cpu"),
            )
            .await
            .unwrap();
        h.alerts
            .upsert(threshold_alert("recorder").with_enabled(false))
            .await
            .unwrap();

        let outcomes = h
            .dispatcher
            .evaluate_batch(vec![
                ScheduledTask::new(1, T0),
                ScheduledTask::new(2, T0),
                ScheduledTask::new(3, T0),
            ])
            .await;
        assert!(outcomes.iter().all(|o| o.status == JobStatus::Failure));
        assert_eq!(h.dispatcher.stats().failed, 3);
        assert_eq!(h.dispatcher.history().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_uses_latest_timestamp() {
        let h = harness();
        h.alerts.upsert(threshold_alert("recorder")).await.unwrap();
        h.source.push(Series::new("host", "cpu").with_datapoint(T0, 15.0));
        h.clock.set(T0 + MINUTE);

        let outcomes = h
            .dispatcher
            .evaluate_batch(vec![
                ScheduledTask::new(1, T0 + MINUTE),
                ScheduledTask::new(1, T0),
            ])
            .await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].tracking_id, format!("1_{}", T0 + MINUTE));
        assert_eq!(outcomes[0].status, JobStatus::Success);
        assert_eq!(h.recorder.sends(), 1);

        let stats = h.dispatcher.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.evaluated, 1);
    }

    #[tokio::test]
    async fn test_notifier_failure_is_contained() {
        let h = harness();
        h.alerts.upsert(threshold_alert("recorder")).await.unwrap();
        h.source.push(Series::new("host", "cpu").with_datapoint(T0, 15.0));
        h.recorder.set_response(RecorderResponse::Fail);

        let outcome = evaluate_at(&h, T0).await;
        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(outcome.notifications_sent, 0);
        assert_eq!(h.dispatcher.stats().notifier_failures, 1);
    }

    #[tokio::test]
    async fn test_latest_value_notifications() {
        let h = harness();
        let alert = threshold_alert("recorder")
            .with_notification(Notification::new(102, 1, "dashboard", "latest", 0))
            .with_notification(Notification::new(103, 1, "misattached", "latest", 0).with_trigger(10));
        h.alerts.upsert(alert).await.unwrap();
        h.source.push(
            Series::new("host", "cpu")
                .with_datapoint(T0 - MINUTE, 3.0)
                .with_datapoint(T0, 4.0),
        );

        evaluate_at(&h, T0).await;
        let events = h.latest.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].notification_id, 102);
        assert_eq!(events[0].value, Some(4.0));
        let entry = &h.dispatcher.history().recent(1)[0];
        assert!(entry.message().contains("must not be associated with triggers"));
    }

    struct Lagging;

    #[async_trait]
    impl DataLagGate for Lagging {
        async fn is_lagging(&self, _alert: &AlertDefinition) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_data_lag_skips() {
        let mut h = harness();
        h.dispatcher = h.dispatcher.with_lag_gate(Arc::new(Lagging));
        h.alerts.upsert(threshold_alert("recorder")).await.unwrap();
        h.source.push(Series::new("host", "cpu").with_datapoint(T0, 15.0));

        let outcome = evaluate_at(&h, T0).await;
        assert_eq!(outcome.status, JobStatus::Skipped);
        assert_eq!(h.dispatcher.stats().skipped, 1);
        assert_eq!(h.recorder.sends(), 0);
    }

    #[tokio::test]
    async fn test_delayed_evaluation_counted_and_anchored() {
        let h = harness();
        h.alerts.upsert(threshold_alert("recorder")).await.unwrap();
        h.source.push(Series::new("host", "cpu").with_datapoint(T0, 15.0));

        // evaluated 30 minutes late: the window still ends at the enqueue time
        h.clock.set(T0 + 30 * MINUTE);
        let outcome = h.dispatcher.evaluate(ScheduledTask::new(1, T0)).await;
        assert_eq!(outcome.notifications_sent, 1);
        assert_eq!(h.dispatcher.stats().delayed, 1);
    }

    #[tokio::test]
    async fn test_query_failure_records_history() {
        let h = harness();
        h.alerts.upsert(threshold_alert("recorder")).await.unwrap();
        h.source.set_failure(Some(SourceError::Query("backend down".into())));

        let outcome = evaluate_at(&h, T0).await;
        assert_eq!(outcome.status, JobStatus::Failure);
        let entry = &h.dispatcher.history().for_alert(1)[0];
        assert_eq!(entry.status, JobStatus::Failure);
        assert!(entry.message().contains("backend down"));
    }

    /// Rejects every write for one notification
    struct RejectingStore {
        inner: InMemoryNotificationStateStore,
        rejected: NotificationId,
    }

    impl RejectingStore {
        fn check(&self, notification_id: NotificationId) -> Result<(), StateError> {
            if notification_id == self.rejected {
                Err(StateError::Store(format!("write rejected for {}", notification_id)))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl NotificationStateStore for RejectingStore {
        async fn load_all(&self) -> Result<StateTables, StateError> {
            self.inner.load_all().await
        }

        async fn load(&self, notification_id: NotificationId) -> Result<NotificationState, StateError> {
            self.inner.load(notification_id).await
        }

        async fn set_cooldown_expiration(
            &self,
            notification_id: NotificationId,
            key: &str,
            expiration_ms: i64,
        ) -> Result<(), StateError> {
            self.check(notification_id)?;
            self.inner
                .set_cooldown_expiration(notification_id, key, expiration_ms)
                .await
        }

        async fn set_active(
            &self,
            notification_id: NotificationId,
            key: &str,
            active: bool,
        ) -> Result<(), StateError> {
            self.check(notification_id)?;
            self.inner.set_active(notification_id, key, active).await
        }
    }

    #[tokio::test]
    async fn test_state_write_failure_spares_sibling_notifications() {
        let h = harness();
        let store = Arc::new(RejectingStore {
            inner: InMemoryNotificationStateStore::new(),
            rejected: 100,
        });
        let state = Arc::new(NotificationStateCache::new(store.clone(), h.clock.clone()));
        let mut registry = NotifierRegistry::new();
        registry.register(h.recorder.clone());
        let dispatcher = NotificationDispatcher::new(
            h.alerts.clone(),
            state,
            h.source.clone(),
            registry,
            h.clock.clone(),
        );

        h.alerts
            .upsert(
                threshold_alert("recorder").with_notification(
                    Notification::new(200, 1, "page backup", "recorder", 300_000).with_trigger(10),
                ),
            )
            .await
            .unwrap();
        h.source.push(Series::new("host", "cpu").with_datapoint(T0, 15.0));

        let outcome = dispatcher.evaluate(ScheduledTask::new(1, T0)).await;
        assert_eq!(outcome.status, JobStatus::Success);
        assert_eq!(outcome.notifications_sent, 1);

        let events = h.recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].notification_id, 200);
        assert!(store.inner.load(200).await.unwrap().active_status.values().any(|a| *a));

        let stats = dispatcher.stats();
        assert_eq!(stats.state_write_failures, 1);
        assert_eq!(stats.failed, 0);
        let entry = &dispatcher.history().for_alert(1)[0];
        assert!(entry.message().contains("Could not update the state of notification `page`"));
    }
}
