//! Lease-based distributed scheduler
//!
//! Each partition has its own lease and its own state machine:
//!
//! ```text
//! Idle -> AcquiringLease -> Leading | Partitioned -> Idle (lease lost / shutdown)
//! ```
//!
//! While holding a lease the runner publishes the alerts due in the current
//! minute once, then extends the lease when the refresh period has elapsed.
//! A newly acquired lease starts publishing at the next minute boundary, so a
//! minute already served by the previous holder is never published twice.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;

use super::partition::{lease_purpose, HashPartitioner, PartitionStrategy};
use crate::catalog::{AlertCatalogCache, CatalogError};
use crate::clock::{minute_floor, Clock};
use crate::cluster::{Coordinator, CoordinatorError, LeaseConfig, LeaseKey};
use crate::data::ScheduledTask;
use crate::queue::{DispatchQueue, ALERT_TOPIC};
use crate::shutdown::ShutdownSignal;

const MINUTE_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Idle,
    AcquiringLease,
    /// Holding the only scheduling lease
    Leading,
    /// Holding the lease of one partition out of several
    Partitioned,
}

/// Runtime view of one partition
#[derive(Debug, Clone, Serialize)]
pub struct PartitionStatus {
    pub partition: u32,
    pub purpose: String,
    pub state: SchedulerState,
    pub last_published_minute_ms: Option<i64>,
    pub alerts_published: u64,
    pub publish_failures: u64,
    pub lease_acquisitions: u64,
    pub lease_losses: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub node_id: String,
    pub enabled: bool,
    pub partitions: Vec<PartitionStatus>,
}

/// One scheduling authority per alert per minute
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Drive the scheduler until `shutdown` fires, releasing held leases on exit
    async fn run(&self, shutdown: ShutdownSignal);

    fn status(&self) -> SchedulerStatus;

    /// Global scheduling switch; when off nothing is published and leases
    /// are given up
    fn set_enabled(&self, enabled: bool);
}

struct Shared {
    config: LeaseConfig,
    enabled: AtomicBool,
    catalog: Arc<AlertCatalogCache>,
    queue: Arc<dyn DispatchQueue>,
    coordinator: Arc<dyn Coordinator>,
    partitioner: Arc<dyn PartitionStrategy>,
    clock: Arc<dyn Clock>,
    topic: String,
}

pub struct DistributedScheduler {
    shared: Arc<Shared>,
    statuses: Vec<Arc<RwLock<PartitionStatus>>>,
}

impl DistributedScheduler {
    pub fn new(
        config: LeaseConfig,
        catalog: Arc<AlertCatalogCache>,
        queue: Arc<dyn DispatchQueue>,
        coordinator: Arc<dyn Coordinator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let statuses = (0..config.partitions.max(1))
            .map(|partition| {
                Arc::new(RwLock::new(PartitionStatus {
                    partition,
                    purpose: lease_purpose(partition),
                    state: SchedulerState::Idle,
                    last_published_minute_ms: None,
                    alerts_published: 0,
                    publish_failures: 0,
                    lease_acquisitions: 0,
                    lease_losses: 0,
                }))
            })
            .collect();

        Self {
            shared: Arc::new(Shared {
                config,
                enabled: AtomicBool::new(true),
                catalog,
                queue,
                coordinator,
                partitioner: Arc::new(HashPartitioner),
                clock,
                topic: ALERT_TOPIC.to_string(),
            }),
            statuses,
        }
    }

    pub fn with_partitioner(mut self, partitioner: Arc<dyn PartitionStrategy>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.partitioner = partitioner;
        }
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.topic = topic.into();
        }
        self
    }

    /// State machine for one partition; `run` drives one per partition
    pub fn runner(&self, partition: u32) -> Option<PartitionRunner> {
        let status = self.statuses.get(partition as usize)?.clone();
        Some(PartitionRunner {
            partition,
            purpose: lease_purpose(partition),
            shared: self.shared.clone(),
            lease: None,
            next_minute_ms: i64::MAX,
            status,
        })
    }
}

#[async_trait]
impl Scheduler for DistributedScheduler {
    async fn run(&self, shutdown: ShutdownSignal) {
        tracing::info!(
            node_id = %self.shared.config.node_id,
            partitions = self.statuses.len(),
            "Scheduler started"
        );
        let loops = (0..self.statuses.len() as u32)
            .filter_map(|p| self.runner(p))
            .map(|runner| runner.run(shutdown.clone()));
        futures::future::join_all(loops).await;
        tracing::info!(node_id = %self.shared.config.node_id, "Scheduler stopped");
    }

    fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            node_id: self.shared.config.node_id.clone(),
            enabled: self.shared.enabled.load(Ordering::Relaxed),
            partitions: self.statuses.iter().map(|s| s.read().clone()).collect(),
        }
    }

    fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Relaxed);
        tracing::info!(enabled, "Scheduling switch changed");
    }
}

#[derive(Debug, Clone)]
struct HeldLease {
    key: LeaseKey,
    renewed_at_ms: i64,
}

pub struct PartitionRunner {
    partition: u32,
    purpose: String,
    shared: Arc<Shared>,
    lease: Option<HeldLease>,
    /// First minute this lease may publish
    next_minute_ms: i64,
    status: Arc<RwLock<PartitionStatus>>,
}

impl PartitionRunner {
    pub fn state(&self) -> SchedulerState {
        self.status.read().state
    }

    pub fn holds_lease(&self) -> bool {
        self.lease.is_some()
    }

    async fn run(mut self, mut shutdown: ShutdownSignal) {
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            let wait = self.step().await;
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.recv() => break,
            }
        }
        self.release().await;
    }

    /// Advance the state machine once; returns how long to wait before the
    /// next step
    pub async fn step(&mut self) -> Duration {
        let now = self.shared.clock.now_ms();

        if !self.shared.enabled.load(Ordering::Relaxed) {
            self.release().await;
            return until_next_minute(now);
        }

        match self.lease.clone() {
            None => self.acquire(now).await,
            Some(held) => self.lead(now, held).await,
        }
    }

    async fn acquire(&mut self, now: i64) -> Duration {
        self.set_state(SchedulerState::AcquiringLease);
        let shared = self.shared.clone();
        let config = &shared.config;

        let result = self
            .bounded(shared.coordinator.acquire_lease(
                config.ttl_ms(),
                &self.purpose,
                &config.node_id,
            ))
            .await;

        match result {
            Ok(Some(key)) => {
                tracing::info!(
                    node_id = %config.node_id,
                    purpose = %self.purpose,
                    "Acquired scheduling lease"
                );
                self.lease = Some(HeldLease {
                    key,
                    renewed_at_ms: now,
                });
                self.next_minute_ms = minute_floor(now) + MINUTE_MS;
                self.status.write().lease_acquisitions += 1;
                self.set_state(self.leading_state());
                until_next_minute(now)
            }
            Ok(None) => {
                tracing::debug!(purpose = %self.purpose, "Lease held by another node");
                self.set_state(SchedulerState::Idle);
                config.acquire_backoff
            }
            Err(e) => {
                tracing::error!(purpose = %self.purpose, error = %e, "Failed to acquire lease");
                self.set_state(SchedulerState::Idle);
                config.acquire_backoff
            }
        }
    }

    async fn lead(&mut self, now: i64, held: HeldLease) -> Duration {
        let shared = self.shared.clone();
        let config = &shared.config;

        if now - held.renewed_at_ms >= config.ttl_ms() {
            tracing::warn!(purpose = %self.purpose, "Lease expired before it was refreshed");
            self.lose_lease();
            return config.acquire_backoff;
        }

        let minute = minute_floor(now);
        if minute >= self.next_minute_ms {
            self.publish(minute).await;
            self.next_minute_ms = minute + MINUTE_MS;
        }

        if now - held.renewed_at_ms >= config.refresh_period.as_millis() as i64 {
            let result = self
                .bounded(shared.coordinator.refresh_lease(
                    &self.purpose,
                    &held.key,
                    &config.node_id,
                ))
                .await;
            match result {
                Ok(Some(key)) => {
                    tracing::debug!(purpose = %self.purpose, "Refreshed scheduling lease");
                    self.lease = Some(HeldLease {
                        key,
                        renewed_at_ms: now,
                    });
                }
                Ok(None) => {
                    tracing::warn!(purpose = %self.purpose, "Lease lost to another node");
                    self.lose_lease();
                    return config.acquire_backoff;
                }
                Err(e) => {
                    tracing::error!(purpose = %self.purpose, error = %e, "Failed to refresh lease");
                    self.lose_lease();
                    return config.acquire_backoff;
                }
            }
        }

        until_next_minute(now)
    }

    /// Publish this partition's alerts due at `minute`
    async fn publish(&mut self, minute: i64) {
        let shared = self.shared.clone();
        let due = match shared.catalog.due_alert_ids(minute) {
            Ok(ids) => ids,
            Err(CatalogError::NotInitialized) => {
                tracing::info!(minute, "Alert catalog not initialized, nothing scheduled");
                return;
            }
            Err(e) => {
                tracing::error!(minute, error = %e, "Failed to read due alerts");
                return;
            }
        };

        let partitions = self.shared.config.partitions;
        let tasks: Vec<ScheduledTask> = due
            .into_iter()
            .filter(|id| shared.partitioner.partition_of(*id, partitions) == self.partition)
            .map(|id| ScheduledTask::new(id, minute))
            .collect();

        let mut published = 0usize;
        let mut failures = 0usize;
        if !tasks.is_empty() {
            match shared.queue.publish(&shared.topic, tasks.clone()).await {
                Ok(n) => published = n,
                Err(e) => {
                    tracing::warn!(minute, error = %e, "Batch publish failed, publishing alerts one by one");
                    for task in tasks {
                        match shared.queue.publish(&shared.topic, vec![task]).await {
                            Ok(n) => published += n,
                            Err(e) => {
                                failures += 1;
                                tracing::warn!(
                                    alert_id = task.alert_id,
                                    minute,
                                    error = %e,
                                    "Failed to schedule alert"
                                );
                            }
                        }
                    }
                }
            }
        }

        tracing::info!(
            partition = self.partition,
            minute,
            published,
            failures,
            "Scheduled due alerts"
        );
        let mut status = self.status.write();
        status.last_published_minute_ms = Some(minute);
        status.alerts_published += published as u64;
        status.publish_failures += failures as u64;
    }

    /// Give up the lease, if held
    pub async fn release(&mut self) {
        if let Some(held) = self.lease.take() {
            let result = self
                .bounded(self.shared.coordinator.release_lease(&self.purpose, &held.key))
                .await;
            match result {
                Ok(()) => tracing::info!(purpose = %self.purpose, "Released scheduling lease"),
                Err(e) => {
                    tracing::warn!(purpose = %self.purpose, error = %e, "Failed to release lease")
                }
            }
        }
        self.set_state(SchedulerState::Idle);
    }

    fn lose_lease(&mut self) {
        self.lease = None;
        self.status.write().lease_losses += 1;
        self.set_state(SchedulerState::Idle);
    }

    fn leading_state(&self) -> SchedulerState {
        if self.shared.config.partitions > 1 {
            SchedulerState::Partitioned
        } else {
            SchedulerState::Leading
        }
    }

    fn set_state(&self, state: SchedulerState) {
        self.status.write().state = state;
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CoordinatorError>>,
    ) -> Result<T, CoordinatorError> {
        let timeout = self.shared.config.acquire_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CoordinatorError::Timeout(timeout.as_millis() as u64)),
        }
    }
}

fn until_next_minute(now: i64) -> Duration {
    let wait = minute_floor(now) + MINUTE_MS - now;
    Duration::from_millis(wait.max(1) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::catalog::{AlertStore, InMemoryAlertStore};
    use crate::clock::ManualClock;
    use crate::cluster::InMemoryCoordinator;
    use crate::data::AlertDefinition;
    use crate::queue::InMemoryQueue;
    use crate::refresh::Refreshable;

    const T0: i64 = 1_700_000_040_000;

    struct Cluster {
        clock: Arc<ManualClock>,
        catalog: Arc<AlertCatalogCache>,
        queue: Arc<InMemoryQueue>,
        coordinator: Arc<InMemoryCoordinator>,
    }

    async fn cluster(alerts: Vec<AlertDefinition>) -> Cluster {
        let clock = ManualClock::new(T0 + 5_000);
        let store = Arc::new(InMemoryAlertStore::new());
        for alert in alerts {
            store.upsert(alert).await.unwrap();
        }
        let catalog = Arc::new(AlertCatalogCache::new(store, clock.clone()));
        assert!(catalog.refresh().await);
        Cluster {
            clock: clock.clone(),
            catalog,
            queue: Arc::new(InMemoryQueue::new()),
            coordinator: Arc::new(InMemoryCoordinator::new(clock)),
        }
    }

    fn every_minute(id: u64) -> AlertDefinition {
        AlertDefinition::new(id, format!("alert-{}", id), "* * * * *", "-5m:host:cpu")
    }

    fn node(c: &Cluster, node_id: &str, partitions: u32) -> DistributedScheduler {
        let config = LeaseConfig {
            node_id: node_id.to_string(),
            partitions,
            ..LeaseConfig::default()
        };
        DistributedScheduler::new(
            config,
            c.catalog.clone(),
            c.queue.clone(),
            c.coordinator.clone(),
            c.clock.clone(),
        )
    }

    async fn drain(queue: &InMemoryQueue) -> Vec<ScheduledTask> {
        queue
            .dequeue(ALERT_TOPIC, Duration::from_millis(10), 1000)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_leader_publishes_once_per_minute() {
        let c = cluster(vec![every_minute(1), every_minute(2)]).await;
        let a = node(&c, "a", 1);
        let b = node(&c, "b", 1);
        let mut ra = a.runner(0).unwrap();
        let mut rb = b.runner(0).unwrap();

        ra.step().await;
        rb.step().await;
        assert_eq!(ra.state(), SchedulerState::Leading);
        assert_eq!(rb.state(), SchedulerState::Idle);
        assert_eq!(c.coordinator.holder("schedule-0").as_deref(), Some("a"));
        // the acquisition minute is left to the previous holder
        assert!(drain(&c.queue).await.is_empty());

        c.clock.set(T0 + 60_000);
        ra.step().await;
        rb.step().await;
        ra.step().await;
        let tasks = drain(&c.queue).await;
        let ids: Vec<u64> = tasks.iter().map(|t| t.alert_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(tasks.iter().all(|t| t.enqueued_at_ms == T0 + 60_000));

        let status = a.status();
        assert_eq!(status.partitions[0].alerts_published, 2);
        assert_eq!(status.partitions[0].last_published_minute_ms, Some(T0 + 60_000));
    }

    #[tokio::test]
    async fn test_takeover_after_release() {
        let c = cluster(vec![every_minute(1)]).await;
        let a = node(&c, "a", 1);
        let b = node(&c, "b", 1);
        let mut ra = a.runner(0).unwrap();
        let mut rb = b.runner(0).unwrap();

        ra.step().await;
        c.clock.set(T0 + 60_000);
        ra.step().await;
        assert_eq!(drain(&c.queue).await.len(), 1);

        ra.release().await;
        assert!(!ra.holds_lease());
        c.clock.set(T0 + 65_000);
        rb.step().await;
        assert_eq!(rb.state(), SchedulerState::Leading);
        rb.step().await;
        assert!(drain(&c.queue).await.is_empty());

        c.clock.set(T0 + 120_000);
        rb.step().await;
        assert_eq!(drain(&c.queue).await.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let c = cluster(vec![every_minute(1)]).await;
        let a = node(&c, "a", 1);
        let b = node(&c, "b", 1);
        let mut ra = a.runner(0).unwrap();
        let mut rb = b.runner(0).unwrap();

        ra.step().await;
        // node a stalls past the ttl
        c.clock.advance(LeaseConfig::default().ttl_ms() + 1);
        rb.step().await;
        assert_eq!(rb.state(), SchedulerState::Leading);

        ra.step().await;
        assert_eq!(ra.state(), SchedulerState::Idle);
        assert_eq!(a.status().partitions[0].lease_losses, 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_drops_to_idle() {
        let c = cluster(vec![every_minute(1)]).await;
        let a = node(&c, "a", 1);
        let mut ra = a.runner(0).unwrap();

        ra.step().await;
        c.clock.advance(LeaseConfig::default().refresh_period.as_millis() as i64);
        c.coordinator.set_unavailable(true);
        let wait = ra.step().await;
        assert_eq!(wait, LeaseConfig::default().acquire_backoff);
        assert_eq!(ra.state(), SchedulerState::Idle);

        // the stale lease must expire before it can be reacquired
        c.coordinator.set_unavailable(false);
        ra.step().await;
        assert_eq!(ra.state(), SchedulerState::Idle);
        c.clock.advance(2 * 60_000);
        ra.step().await;
        assert_eq!(ra.state(), SchedulerState::Leading);
    }

    #[tokio::test]
    async fn test_refresh_keeps_leadership() {
        let c = cluster(vec![every_minute(1)]).await;
        let a = node(&c, "a", 1);
        let b = node(&c, "b", 1);
        let mut ra = a.runner(0).unwrap();
        let mut rb = b.runner(0).unwrap();

        ra.step().await;
        for _ in 0..20 {
            c.clock.advance(60_000);
            ra.step().await;
            rb.step().await;
            assert_eq!(ra.state(), SchedulerState::Leading);
            assert_eq!(rb.state(), SchedulerState::Idle);
        }
        assert_eq!(drain(&c.queue).await.len(), 20);
    }

    #[tokio::test]
    async fn test_disabled_scheduler_stays_idle() {
        let c = cluster(vec![every_minute(1)]).await;
        let a = node(&c, "a", 1);
        let mut ra = a.runner(0).unwrap();

        ra.step().await;
        a.set_enabled(false);
        c.clock.set(T0 + 60_000);
        ra.step().await;
        assert_eq!(ra.state(), SchedulerState::Idle);
        assert!(c.coordinator.holder("schedule-0").is_none());
        assert!(drain(&c.queue).await.is_empty());
        assert!(!a.status().enabled);
    }

    #[tokio::test]
    async fn test_partitions_cover_every_alert_once() {
        let alerts: Vec<AlertDefinition> = (1..=40).map(every_minute).collect();
        let c = cluster(alerts).await;
        let a = node(&c, "a", 4);
        let b = node(&c, "b", 4);

        let mut runners: Vec<PartitionRunner> = (0..2)
            .filter_map(|p| a.runner(p))
            .chain((2..4).filter_map(|p| b.runner(p)))
            .collect();
        // b also competes for a's partitions
        let mut contenders: Vec<PartitionRunner> = (0..2).filter_map(|p| b.runner(p)).collect();

        for r in runners.iter_mut() {
            r.step().await;
        }
        for r in contenders.iter_mut() {
            r.step().await;
            assert_eq!(r.state(), SchedulerState::Idle);
        }
        assert!(runners.iter().all(|r| r.state() == SchedulerState::Partitioned));

        c.clock.set(T0 + 60_000);
        for r in runners.iter_mut().chain(contenders.iter_mut()) {
            r.step().await;
        }
        let tasks = drain(&c.queue).await;
        let ids: HashSet<u64> = tasks.iter().map(|t| t.alert_id).collect();
        assert_eq!(tasks.len(), 40);
        assert_eq!(ids.len(), 40);
    }

    #[tokio::test]
    async fn test_uninitialized_catalog_publishes_nothing() {
        let clock = ManualClock::new(T0);
        let store = Arc::new(InMemoryAlertStore::new());
        store.upsert(every_minute(1)).await.unwrap();
        let c = Cluster {
            catalog: Arc::new(AlertCatalogCache::new(store, clock.clone())),
            queue: Arc::new(InMemoryQueue::new()),
            coordinator: Arc::new(InMemoryCoordinator::new(clock.clone())),
            clock,
        };
        let a = node(&c, "a", 1);
        let mut ra = a.runner(0).unwrap();

        ra.step().await;
        c.clock.set(T0 + 60_000);
        ra.step().await;
        assert!(drain(&c.queue).await.is_empty());
        assert_eq!(a.status().partitions[0].last_published_minute_ms, None);
    }

    #[tokio::test]
    async fn test_run_releases_lease_on_shutdown() {
        let c = cluster(vec![every_minute(1)]).await;
        let a = Arc::new(node(&c, "a", 1));
        let (trigger, signal) = crate::shutdown::channel();

        let handle = {
            let a = a.clone();
            tokio::spawn(async move { a.run(signal).await })
        };
        for _ in 0..50 {
            if c.coordinator.holder("schedule-0").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(c.coordinator.holder("schedule-0").as_deref(), Some("a"));

        trigger.trigger();
        tokio_test::assert_ok!(handle.await);
        assert!(c.coordinator.holder("schedule-0").is_none());
        assert_eq!(a.status().partitions[0].state, SchedulerState::Idle);
    }
}
