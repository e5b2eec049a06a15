//! Transport between the scheduler and the evaluation workers
//!
//! At-least-once delivery is enough: the scheduler guarantees each alert is
//! published at most once per cron minute.

use std::time::Duration;

use async_trait::async_trait;

use crate::data::ScheduledTask;

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaQueue, KafkaQueueConfig};
pub use memory::InMemoryQueue;

/// Topic carrying scheduled alert evaluations
pub const ALERT_TOPIC: &str = "vigil.alerts.scheduled";

/// FIFO queue of scheduled tasks
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Enqueue tasks in order; returns how many were accepted
    async fn publish(&self, topic: &str, tasks: Vec<ScheduledTask>) -> Result<usize, QueueError>;

    /// Wait up to `timeout` for at least one task and return at most `max`.
    /// An empty result means the wait timed out.
    async fn dequeue(
        &self,
        topic: &str,
        timeout: Duration,
        max: usize,
    ) -> Result<Vec<ScheduledTask>, QueueError>;
}

/// Queue errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Malformed task payload: {0}")]
    Malformed(String),
}
