//! Alert store contract and an in-memory implementation

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::CatalogError;
use crate::data::{AlertDefinition, AlertId};

/// Primary store of alert definitions
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// All alerts that are enabled and not tombstoned
    async fn find_enabled(&self) -> Result<Vec<AlertDefinition>, CatalogError>;

    /// Alerts for the given ids; missing or tombstoned ids are omitted
    async fn find_by_ids(&self, ids: &[AlertId]) -> Result<Vec<AlertDefinition>, CatalogError>;

    /// Insert or replace an alert
    async fn upsert(&self, alert: AlertDefinition) -> Result<(), CatalogError>;

    /// Tombstone an alert; returns false if it does not exist
    async fn mark_deleted(&self, id: AlertId) -> Result<bool, CatalogError>;
}

/// Alert store held in process memory
#[derive(Default)]
pub struct InMemoryAlertStore {
    alerts: DashMap<AlertId, AlertDefinition>,
    unavailable: AtomicBool,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage; every call fails while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    fn check_available(&self) -> Result<(), CatalogError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CatalogError::Store("alert store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn find_enabled(&self) -> Result<Vec<AlertDefinition>, CatalogError> {
        self.check_available()?;
        Ok(self
            .alerts
            .iter()
            .filter(|entry| entry.value().is_schedulable())
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn find_by_ids(&self, ids: &[AlertId]) -> Result<Vec<AlertDefinition>, CatalogError> {
        self.check_available()?;
        Ok(ids
            .iter()
            .filter_map(|id| self.alerts.get(id))
            .filter(|entry| !entry.value().deleted)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn upsert(&self, alert: AlertDefinition) -> Result<(), CatalogError> {
        self.check_available()?;
        self.alerts.insert(alert.id, alert);
        Ok(())
    }

    async fn mark_deleted(&self, id: AlertId) -> Result<bool, CatalogError> {
        self.check_available()?;
        match self.alerts.get_mut(&id) {
            Some(mut entry) => {
                entry.deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
