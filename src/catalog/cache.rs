//! In-memory index of schedulable alerts keyed by id and by cron entry

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::store::AlertStore;
use super::CatalogError;
use crate::clock::Clock;
use crate::data::{AlertDefinition, AlertId};
use crate::refresh::{RefreshStats, Refreshable, SnapshotCell};
use crate::schedule::cron::CronCache;

/// One consistent view of the catalog
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    by_id: HashMap<AlertId, Arc<AlertDefinition>>,
    by_cron: HashMap<String, Vec<AlertId>>,
}

impl CatalogSnapshot {
    /// Index schedulable alerts; disabled and tombstoned alerts are dropped
    pub fn build(alerts: Vec<AlertDefinition>) -> Self {
        let mut by_id = HashMap::with_capacity(alerts.len());
        let mut by_cron: HashMap<String, Vec<AlertId>> = HashMap::new();

        for alert in alerts.into_iter().filter(AlertDefinition::is_schedulable) {
            by_cron
                .entry(alert.cron_entry.trim().to_string())
                .or_default()
                .push(alert.id);
            by_id.insert(alert.id, Arc::new(alert));
        }

        Self { by_id, by_cron }
    }

    pub fn alert_count(&self) -> usize {
        self.by_id.len()
    }

    pub fn cron_entry_count(&self) -> usize {
        self.by_cron.len()
    }
}

/// Periodically refreshed catalog used by the scheduler on every tick
pub struct AlertCatalogCache {
    store: Arc<dyn AlertStore>,
    snapshot: SnapshotCell<CatalogSnapshot>,
    crons: CronCache,
    clock: Arc<dyn Clock>,
}

impl AlertCatalogCache {
    pub fn new(store: Arc<dyn AlertStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            snapshot: SnapshotCell::new(),
            crons: CronCache::default(),
            clock,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.snapshot.is_initialized()
    }

    /// Alerts whose cron entry fires exactly at `minute_start_ms`, sorted by id
    pub fn due_alerts(
        &self,
        minute_start_ms: i64,
    ) -> Result<Vec<Arc<AlertDefinition>>, CatalogError> {
        let snapshot = self.snapshot.load().ok_or(CatalogError::NotInitialized)?;

        let mut due: Vec<AlertId> = Vec::new();
        for (entry, ids) in &snapshot.by_cron {
            let cron = match self.crons.get(entry) {
                Ok(cron) => cron,
                Err(e) => {
                    tracing::warn!(
                        cron_entry = %entry,
                        alerts = ids.len(),
                        error = %e,
                        "Skipping unparseable cron entry"
                    );
                    continue;
                }
            };
            if cron.fires_at(minute_start_ms) {
                due.extend_from_slice(ids);
            }
        }
        due.sort_unstable();

        Ok(due
            .into_iter()
            .filter_map(|id| snapshot.by_id.get(&id).cloned())
            .collect())
    }

    /// Ids of the alerts due at `minute_start_ms`
    pub fn due_alert_ids(&self, minute_start_ms: i64) -> Result<Vec<AlertId>, CatalogError> {
        Ok(self
            .due_alerts(minute_start_ms)?
            .iter()
            .map(|alert| alert.id)
            .collect())
    }

    /// Cached definition, if present in the current snapshot
    pub fn get(&self, id: AlertId) -> Option<Arc<AlertDefinition>> {
        self.snapshot
            .load()
            .and_then(|snapshot| snapshot.by_id.get(&id).cloned())
    }

    pub fn stats(&self) -> CatalogStats {
        let snapshot = self.snapshot.load();
        CatalogStats {
            refresh: self.snapshot.stats(),
            alerts: snapshot.as_ref().map(|s| s.alert_count()).unwrap_or(0),
            cron_entries: snapshot.as_ref().map(|s| s.cron_entry_count()).unwrap_or(0),
            parsed_cron_entries: self.crons.entry_count(),
        }
    }
}

#[async_trait]
impl Refreshable for AlertCatalogCache {
    fn name(&self) -> &'static str {
        "alert_catalog"
    }

    async fn refresh(&self) -> bool {
        match self.store.find_enabled().await {
            Ok(alerts) => {
                let snapshot = CatalogSnapshot::build(alerts);
                tracing::debug!(
                    alerts = snapshot.alert_count(),
                    cron_entries = snapshot.cron_entry_count(),
                    "Alert catalog refreshed"
                );
                self.snapshot.publish(snapshot, self.clock.now_ms());
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to refresh alert catalog");
                self.snapshot.mark_failed();
                false
            }
        }
    }
}

/// Catalog cache status
#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub refresh: RefreshStats,
    pub alerts: usize,
    pub cron_entries: usize,
    pub parsed_cron_entries: u64,
}
