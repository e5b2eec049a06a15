//! Notifiers by name

use std::collections::HashMap;
use std::sync::Arc;

use super::{DeliveryMode, LogNotifier, Notifier, NotifierError};

/// Name of the notifier used for alert-level missing-data notifications
pub const MISSING_DATA_NOTIFIER: &str = "missing-data";

#[derive(Clone, Default)]
pub struct NotifierRegistry {
    notifiers: HashMap<String, Arc<dyn Notifier>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with log-backed notifiers for every delivery mode:
    /// `log`, `log-every-evaluation`, `log-latest-value` and `missing-data`
    pub fn with_log_notifiers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LogNotifier::new("log", DeliveryMode::Cooldown)));
        registry.register(Arc::new(LogNotifier::new(
            "log-every-evaluation",
            DeliveryMode::EveryEvaluation,
        )));
        registry.register(Arc::new(LogNotifier::new(
            "log-latest-value",
            DeliveryMode::LatestValue,
        )));
        registry.register(Arc::new(LogNotifier::new(
            MISSING_DATA_NOTIFIER,
            DeliveryMode::Cooldown,
        )));
        registry
    }

    /// Register (or replace) a notifier under its own name
    pub fn register(&mut self, notifier: Arc<dyn Notifier>) -> &mut Self {
        self.notifiers.insert(notifier.name().to_string(), notifier);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Notifier>, NotifierError> {
        self.notifiers
            .get(name)
            .cloned()
            .ok_or_else(|| NotifierError::Unknown(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.notifiers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;

    #[test]
    fn test_log_registry() {
        let registry = NotifierRegistry::with_log_notifiers();
        assert_eq!(
            registry.get("log-every-evaluation").unwrap().mode(),
            DeliveryMode::EveryEvaluation
        );
        assert!(registry.get(MISSING_DATA_NOTIFIER).is_ok());
        assert!(matches!(registry.get("email"), Err(NotifierError::Unknown(_))));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = NotifierRegistry::with_log_notifiers();
        registry.register(Arc::new(RecordingNotifier::new("log", DeliveryMode::LatestValue)));
        assert_eq!(registry.get("log").unwrap().mode(), DeliveryMode::LatestValue);
        assert_eq!(registry.names().len(), 4);
    }
}
