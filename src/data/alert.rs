//! Alert catalog types: alerts, triggers and notifications

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub type AlertId = u64;
pub type TriggerId = u64;
pub type NotificationId = u64;

/// An alert definition as held by the catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertDefinition {
    pub id: AlertId,
    pub name: String,
    pub owner: String,
    /// Standard 5-field cron entry, minute resolution
    pub cron_entry: String,
    /// Metric expression resolved by the metric source
    pub expression: String,
    pub enabled: bool,
    /// Tombstone; deleted alerts stay in the store but are never scheduled
    #[serde(default)]
    pub deleted: bool,
    /// Send a notification when the expression returns no data at all
    #[serde(default)]
    pub missing_data_notification: bool,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

impl AlertDefinition {
    /// Create an enabled alert with no triggers or notifications
    pub fn new(
        id: AlertId,
        name: impl Into<String>,
        cron_entry: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            owner: "admin".to_string(),
            cron_entry: cron_entry.into(),
            expression: expression.into(),
            enabled: true,
            deleted: false,
            missing_data_notification: false,
            triggers: Vec::new(),
            notifications: Vec::new(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_notification(mut self, notification: Notification) -> Self {
        self.notifications.push(notification);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_missing_data_notification(mut self, enabled: bool) -> Self {
        self.missing_data_notification = enabled;
        self
    }

    /// Enabled and not tombstoned
    pub fn is_schedulable(&self) -> bool {
        self.enabled && !self.deleted
    }

    pub fn trigger(&self, id: TriggerId) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.id == id)
    }

    /// Triggers referenced by at least one notification, in definition order
    pub fn referenced_triggers(&self) -> Vec<&Trigger> {
        self.triggers
            .iter()
            .filter(|t| {
                self.notifications
                    .iter()
                    .any(|n| n.trigger_ids.contains(&t.id))
            })
            .collect()
    }
}

/// Comparison applied by a trigger
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    GreaterThan,
    GreaterThanOrEq,
    LessThan,
    LessThanOrEq,
    Equal,
    NotEqual,
    /// Inclusive band between the two thresholds
    Between,
    NotBetween,
    NoData,
}

impl TriggerType {
    /// Whether `value` violates the condition
    pub fn holds(&self, value: f64, threshold: f64, secondary: Option<f64>) -> bool {
        match self {
            TriggerType::GreaterThan => value > threshold,
            TriggerType::GreaterThanOrEq => value >= threshold,
            TriggerType::LessThan => value < threshold,
            TriggerType::LessThanOrEq => value <= threshold,
            TriggerType::Equal => value == threshold,
            TriggerType::NotEqual => value != threshold,
            TriggerType::Between | TriggerType::NotBetween => {
                let other = secondary.unwrap_or(threshold);
                let low = threshold.min(other);
                let high = threshold.max(other);
                let inside = value >= low && value <= high;
                if *self == TriggerType::Between {
                    inside
                } else {
                    !inside
                }
            }
            TriggerType::NoData => false,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            TriggerType::GreaterThan => ">",
            TriggerType::GreaterThanOrEq => ">=",
            TriggerType::LessThan => "<",
            TriggerType::LessThanOrEq => "<=",
            TriggerType::Equal => "==",
            TriggerType::NotEqual => "!=",
            TriggerType::Between => "between",
            TriggerType::NotBetween => "not between",
            TriggerType::NoData => "no data",
        }
    }
}

/// A firing condition attached to an alert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    pub id: TriggerId,
    pub name: String,
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    pub threshold: f64,
    #[serde(default)]
    pub secondary_threshold: Option<f64>,
    /// Minimum time in milliseconds the condition must persist
    #[serde(default)]
    pub inertia_ms: i64,
    pub alert_id: AlertId,
}

impl Trigger {
    pub fn new(
        id: TriggerId,
        alert_id: AlertId,
        name: impl Into<String>,
        trigger_type: TriggerType,
        threshold: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            trigger_type,
            threshold,
            secondary_threshold: None,
            inertia_ms: 0,
            alert_id,
        }
    }

    pub fn with_inertia(mut self, inertia_ms: i64) -> Self {
        self.inertia_ms = inertia_ms;
        self
    }

    pub fn with_secondary_threshold(mut self, secondary: f64) -> Self {
        self.secondary_threshold = Some(secondary);
        self
    }

    /// Whether `value` violates this trigger's threshold
    pub fn holds(&self, value: f64) -> bool {
        self.trigger_type
            .holds(value, self.threshold, self.secondary_threshold)
    }

    pub fn is_no_data(&self) -> bool {
        self.trigger_type == TriggerType::NoData
    }
}

/// A dispatch unit bound to an alert and a subset of its triggers
///
/// The cooldown and active-status maps are keyed by series key (see
/// [`crate::data::Series::state_key`]) and are rehydrated from the
/// notification state store before every evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: NotificationId,
    pub name: String,
    pub alert_id: AlertId,
    /// Name the notifier is registered under
    pub notifier: String,
    #[serde(default)]
    pub subscriptions: Vec<String>,
    /// Minimum interval between repeated sends, in milliseconds
    pub cooldown_period_ms: i64,
    #[serde(default)]
    pub trigger_ids: Vec<TriggerId>,
    #[serde(default)]
    pub cooldown_expiration: HashMap<String, i64>,
    #[serde(default)]
    pub active_status: HashMap<String, bool>,
}

impl Notification {
    pub fn new(
        id: NotificationId,
        alert_id: AlertId,
        name: impl Into<String>,
        notifier: impl Into<String>,
        cooldown_period_ms: i64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            alert_id,
            notifier: notifier.into(),
            subscriptions: Vec::new(),
            cooldown_period_ms,
            trigger_ids: Vec::new(),
            cooldown_expiration: HashMap::new(),
            active_status: HashMap::new(),
        }
    }

    pub fn with_trigger(mut self, trigger_id: TriggerId) -> Self {
        self.trigger_ids.push(trigger_id);
        self
    }

    pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscriptions.push(subscription.into());
        self
    }

    pub fn has_triggers(&self) -> bool {
        !self.trigger_ids.is_empty()
    }

    pub fn cooldown_expiration_for(&self, key: &str) -> i64 {
        self.cooldown_expiration.get(key).copied().unwrap_or(0)
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.active_status.get(key).copied().unwrap_or(false)
    }

    /// Cooldown is in effect while its expiration has not passed
    pub fn is_on_cooldown(&self, key: &str, now_ms: i64) -> bool {
        self.cooldown_expiration_for(key) >= now_ms
    }

    pub fn set_cooldown_expiration(&mut self, key: &str, expiration_ms: i64) {
        self.cooldown_expiration.insert(key.to_string(), expiration_ms);
    }

    pub fn set_active(&mut self, key: &str, active: bool) {
        self.active_status.insert(key.to_string(), active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_comparisons() {
        assert!(TriggerType::GreaterThan.holds(11.0, 10.0, None));
        assert!(!TriggerType::GreaterThan.holds(10.0, 10.0, None));
        assert!(TriggerType::GreaterThanOrEq.holds(10.0, 10.0, None));
        assert!(TriggerType::LessThan.holds(9.0, 10.0, None));
        assert!(TriggerType::LessThanOrEq.holds(10.0, 10.0, None));
        assert!(TriggerType::Equal.holds(10.0, 10.0, None));
        assert!(TriggerType::NotEqual.holds(9.0, 10.0, None));
        assert!(!TriggerType::NoData.holds(1.0, 0.0, None));
    }

    #[test]
    fn test_between_is_inclusive_and_order_free() {
        assert!(TriggerType::Between.holds(5.0, 10.0, Some(5.0)));
        assert!(TriggerType::Between.holds(10.0, 5.0, Some(10.0)));
        assert!(!TriggerType::Between.holds(10.5, 5.0, Some(10.0)));
        assert!(TriggerType::NotBetween.holds(4.0, 5.0, Some(10.0)));
        assert!(!TriggerType::NotBetween.holds(7.0, 5.0, Some(10.0)));
    }

    #[test]
    fn test_referenced_triggers() {
        let alert = AlertDefinition::new(1, "cpu", "* * * * *", "-1h:cpu")
            .with_trigger(Trigger::new(10, 1, "high", TriggerType::GreaterThan, 90.0))
            .with_trigger(Trigger::new(11, 1, "unused", TriggerType::LessThan, 1.0))
            .with_notification(Notification::new(20, 1, "page", "log", 60_000).with_trigger(10));

        let ids: Vec<_> = alert.referenced_triggers().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![10]);
    }

    #[test]
    fn test_notification_cooldown_defaults() {
        let mut n = Notification::new(1, 1, "n", "log", 1000);
        assert!(!n.is_active("k"));
        assert_eq!(n.cooldown_expiration_for("k"), 0);
        assert!(!n.is_on_cooldown("k", 1));

        n.set_cooldown_expiration("k", 5000);
        assert!(n.is_on_cooldown("k", 5000));
        assert!(!n.is_on_cooldown("k", 5001));
    }

    #[test]
    fn test_trigger_type_serde() {
        let json = serde_json::to_string(&TriggerType::GreaterThanOrEq).unwrap();
        assert_eq!(json, "\"GREATER_THAN_OR_EQ\"");
        let t: TriggerType = serde_json::from_str("\"NO_DATA\"").unwrap();
        assert_eq!(t, TriggerType::NoData);
    }
}
