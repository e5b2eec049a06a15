//! Kafka-backed dispatch queue
//!
//! Tasks are JSON-encoded [`ScheduledTask`] payloads keyed by alert id.
//! Offsets are committed only after a task has been decoded and handed to a
//! worker, which gives at-least-once delivery across restarts.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `KAFKA_BROKERS`: Comma-separated list of brokers (default: localhost:9092)
//! - `VIGIL_ALERT_TOPIC`: Topic for scheduled alerts (default: vigil.alerts.scheduled)
//! - `KAFKA_GROUP_ID`: Consumer group ID (default: vigil-workers)

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use tokio::time::Instant;

use super::{DispatchQueue, QueueError, ALERT_TOPIC};
use crate::data::ScheduledTask;

/// Kafka queue configuration
#[derive(Debug, Clone)]
pub struct KafkaQueueConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub session_timeout_ms: u32,
    pub max_poll_interval_ms: u32,
}

impl Default for KafkaQueueConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: ALERT_TOPIC.to_string(),
            group_id: "vigil-workers".to_string(),
            session_timeout_ms: 30000,
            max_poll_interval_ms: 300000,
        }
    }
}

impl KafkaQueueConfig {
    /// Create config from environment variables; `None` when no brokers are set
    pub fn from_env() -> Option<Self> {
        let brokers = std::env::var("KAFKA_BROKERS").ok()?;
        if brokers.is_empty() {
            return None;
        }

        Some(Self {
            brokers,
            topic: std::env::var("VIGIL_ALERT_TOPIC").unwrap_or_else(|_| ALERT_TOPIC.to_string()),
            group_id: std::env::var("KAFKA_GROUP_ID")
                .unwrap_or_else(|_| "vigil-workers".to_string()),
            ..Self::default()
        })
    }
}

/// Counters for the Kafka queue
#[derive(Debug, Default, Clone, Serialize)]
pub struct KafkaQueueStats {
    pub published: u64,
    pub received: u64,
    pub malformed: u64,
    pub errors: u64,
}

pub struct KafkaQueue {
    config: KafkaQueueConfig,
    producer: FutureProducer,
    consumer: StreamConsumer,
    published: AtomicU64,
    received: AtomicU64,
    malformed: AtomicU64,
    errors: AtomicU64,
}

impl KafkaQueue {
    pub fn new(config: KafkaQueueConfig) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "10000")
            .create()?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string())
            .create()?;
        consumer.subscribe(&[config.topic.as_str()])?;
        tracing::info!(topic = %config.topic, "Subscribed to Kafka alert topic");

        Ok(Self {
            config,
            producer,
            consumer,
            published: AtomicU64::new(0),
            received: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }

    pub fn stats(&self) -> KafkaQueueStats {
        KafkaQueueStats {
            published: self.published.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn check_topic(&self, topic: &str) -> Result<(), QueueError> {
        if topic == self.config.topic {
            Ok(())
        } else {
            Err(QueueError::UnknownTopic(topic.to_string()))
        }
    }
}

#[async_trait]
impl DispatchQueue for KafkaQueue {
    async fn publish(&self, topic: &str, tasks: Vec<ScheduledTask>) -> Result<usize, QueueError> {
        self.check_topic(topic)?;
        let mut sent = 0;
        for task in tasks {
            let payload = serde_json::to_vec(&task)
                .map_err(|e| QueueError::Malformed(e.to_string()))?;
            let key = task.alert_id.to_string();
            let record = FutureRecord::to(topic).key(&key).payload(&payload);

            match self.producer.send(record, Duration::from_secs(5)).await {
                Ok(_) => {
                    sent += 1;
                    self.published.fetch_add(1, Ordering::Relaxed);
                }
                Err((e, _)) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(alert_id = task.alert_id, error = %e, "Failed to publish task");
                    return Err(QueueError::Unavailable(e.to_string()));
                }
            }
        }
        Ok(sent)
    }

    async fn dequeue(
        &self,
        topic: &str,
        timeout: Duration,
        max: usize,
    ) -> Result<Vec<ScheduledTask>, QueueError> {
        self.check_topic(topic)?;
        let deadline = Instant::now() + timeout;
        let mut tasks = Vec::new();

        while tasks.len() < max {
            let message = match tokio::time::timeout_at(deadline, self.consumer.recv()).await {
                Err(_) => break,
                Ok(Err(e)) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(error = %e, "Kafka receive error");
                    if tasks.is_empty() {
                        return Err(QueueError::Unavailable(e.to_string()));
                    }
                    break;
                }
                Ok(Ok(message)) => message,
            };
            self.received.fetch_add(1, Ordering::Relaxed);

            match message
                .payload()
                .map(serde_json::from_slice::<ScheduledTask>)
            {
                Some(Ok(task)) => tasks.push(task),
                Some(Err(e)) => {
                    self.malformed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %e,
                        "Dropping malformed task"
                    );
                }
                None => {
                    self.malformed.fetch_add(1, Ordering::Relaxed);
                }
            }

            if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                tracing::error!(
                    partition = message.partition(),
                    offset = message.offset(),
                    error = %e,
                    "Failed to commit offset"
                );
            }
        }

        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KafkaQueueConfig::default();
        assert_eq!(config.topic, ALERT_TOPIC);
        assert_eq!(config.group_id, "vigil-workers");
    }
}
