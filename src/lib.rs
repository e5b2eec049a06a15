//! Vigil: distributed cron-scheduled alert evaluation
//!
//! Alerts pair a metric expression with a 5-field cron entry, a set of
//! triggers and a set of notifications. A cluster of nodes cooperates so that
//! each due alert is scheduled by exactly one node per minute; any node can
//! then evaluate it.
//!
//! # Architecture
//!
//! - **Catalog** ([`catalog`]): periodically refreshed snapshot of enabled
//!   alerts indexed by cron entry; answers "which alerts are due this minute".
//! - **Scheduler** ([`schedule`]): lease-based state machine per partition;
//!   the lease holder publishes due alerts onto the dispatch queue.
//! - **Workers** ([`worker`]): dequeue batches and hand them to the
//!   [`dispatch::NotificationDispatcher`].
//! - **Dispatcher** ([`dispatch`]): queries metrics, runs triggers
//!   ([`evaluate`]), walks the cooldown/active-status table and calls
//!   notifiers ([`notify`]).
//! - **Notification state** ([`state`]): read-through cache over the store of
//!   per-(trigger, series) cooldown and active-status entries.
//!
//! Every collaborator (alert store, state store, queue, coordinator, metric
//! source, notifiers) sits behind a trait with an in-memory implementation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vigil::catalog::{AlertStore, InMemoryAlertStore};
//! use vigil::clock::SystemClock;
//! use vigil::data::{AlertDefinition, Notification, ScheduledTask, Trigger, TriggerType};
//! use vigil::dispatch::NotificationDispatcher;
//! use vigil::notify::NotifierRegistry;
//! use vigil::source::InMemoryMetricSource;
//! use vigil::state::{InMemoryNotificationStateStore, NotificationStateCache};
//!
//! # async fn example() {
//! let clock = Arc::new(SystemClock);
//! let alerts = Arc::new(InMemoryAlertStore::new());
//! alerts
//!     .upsert(
//!         AlertDefinition::new(1, "cpu high", "*/5 * * * *", "-10m:host:cpu")
//!             .with_trigger(Trigger::new(1, 1, "above 90", TriggerType::GreaterThan, 90.0))
//!             .with_notification(Notification::new(1, 1, "page", "log", 300_000).with_trigger(1)),
//!     )
//!     .await
//!     .unwrap();
//!
//! let state = Arc::new(NotificationStateCache::new(
//!     Arc::new(InMemoryNotificationStateStore::new()),
//!     clock.clone(),
//! ));
//! let dispatcher = NotificationDispatcher::new(
//!     alerts,
//!     state,
//!     Arc::new(InMemoryMetricSource::new()),
//!     NotifierRegistry::with_log_notifiers(),
//!     clock,
//! );
//! let outcome = dispatcher.evaluate(ScheduledTask::new(1, 1_700_000_040_000)).await;
//! println!("{:?}", outcome.status);
//! # }
//! ```

pub mod api;
pub mod catalog;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod data;
pub mod dispatch;
pub mod evaluate;
pub mod notify;
pub mod queue;
pub mod refresh;
pub mod schedule;
pub mod shutdown;
pub mod source;
pub mod state;
pub mod worker;

// Re-export commonly used types
pub use config::{ConfigError, VigilConfig};
pub use data::{AlertDefinition, Notification, ScheduledTask, Series, Trigger, TriggerType};
pub use dispatch::{EvaluationOutcome, NotificationDispatcher};
pub use schedule::{DistributedScheduler, Scheduler};
