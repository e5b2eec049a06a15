//! Evaluation worker pool
//!
//! Each worker dequeues a batch of scheduled alerts with a bounded wait and
//! hands it to the shared [`NotificationDispatcher`]. Workers share no
//! per-alert state; they stop between batches once shutdown is signalled.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::{env_or, ConfigError};
use crate::dispatch::{DispatcherConfig, NotificationDispatcher};
use crate::queue::{DispatchQueue, ALERT_TOPIC};
use crate::shutdown::ShutdownSignal;

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workers: usize,
    /// Maximum tasks taken per dequeue
    pub dequeue_batch: usize,
    pub dequeue_timeout: Duration,
    pub query_timeout: Duration,
    pub evaluation_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            dequeue_batch: 50,
            dequeue_timeout: Duration::from_millis(1000),
            query_timeout: Duration::from_millis(20_000),
            evaluation_delay: Duration::from_secs(60),
        }
    }
}

impl WorkerConfig {
    /// Read `VIGIL_WORKERS`, `VIGIL_DEQUEUE_BATCH`, `VIGIL_DEQUEUE_TIMEOUT_MS`,
    /// `VIGIL_QUERY_TIMEOUT_MS` and `VIGIL_EVALUATION_DELAY_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            workers: env_or("VIGIL_WORKERS", defaults.workers)?,
            dequeue_batch: env_or("VIGIL_DEQUEUE_BATCH", defaults.dequeue_batch)?,
            dequeue_timeout: Duration::from_millis(env_or(
                "VIGIL_DEQUEUE_TIMEOUT_MS",
                defaults.dequeue_timeout.as_millis() as u64,
            )?),
            query_timeout: Duration::from_millis(env_or(
                "VIGIL_QUERY_TIMEOUT_MS",
                defaults.query_timeout.as_millis() as u64,
            )?),
            evaluation_delay: Duration::from_secs(env_or(
                "VIGIL_EVALUATION_DELAY_SECS",
                defaults.evaluation_delay.as_secs(),
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("VIGIL_WORKERS must be at least 1".to_string()));
        }
        if self.dequeue_batch == 0 {
            return Err(ConfigError::Invalid(
                "VIGIL_DEQUEUE_BATCH must be at least 1".to_string(),
            ));
        }
        if self.dequeue_timeout.is_zero() || self.query_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "dequeue and query timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            query_timeout: self.query_timeout,
            evaluation_delay: self.evaluation_delay,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub active_workers: usize,
    pub batches: u64,
    pub tasks_dequeued: u64,
    pub dequeue_errors: u64,
}

pub struct EvaluationWorkerPool {
    config: WorkerConfig,
    queue: Arc<dyn DispatchQueue>,
    dispatcher: Arc<NotificationDispatcher>,
    topic: String,
    active: AtomicUsize,
    batches: AtomicU64,
    tasks_dequeued: AtomicU64,
    dequeue_errors: AtomicU64,
}

impl EvaluationWorkerPool {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn DispatchQueue>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            config,
            queue,
            dispatcher,
            topic: ALERT_TOPIC.to_string(),
            active: AtomicUsize::new(0),
            batches: AtomicU64::new(0),
            tasks_dequeued: AtomicU64::new(0),
            dequeue_errors: AtomicU64::new(0),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Start `config.workers` workers
    pub fn start(self: Arc<Self>, shutdown: ShutdownSignal) -> Vec<JoinHandle<()>> {
        tracing::info!(workers = self.config.workers, topic = %self.topic, "Starting evaluation workers");
        (0..self.config.workers)
            .map(|id| {
                let pool = Arc::clone(&self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.worker_loop(id, shutdown).await })
            })
            .collect()
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            active_workers: self.active.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            tasks_dequeued: self.tasks_dequeued.load(Ordering::Relaxed),
            dequeue_errors: self.dequeue_errors.load(Ordering::Relaxed),
        }
    }

    async fn worker_loop(&self, id: usize, mut shutdown: ShutdownSignal) {
        self.active.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(worker = id, "Evaluation worker started");

        while !shutdown.is_shutdown() {
            let dequeued = tokio::select! {
                result = self.queue.dequeue(&self.topic, self.config.dequeue_timeout, self.config.dequeue_batch) => result,
                _ = shutdown.recv() => break,
            };

            match dequeued {
                Ok(tasks) if tasks.is_empty() => {}
                Ok(tasks) => {
                    self.batches.fetch_add(1, Ordering::Relaxed);
                    self.tasks_dequeued
                        .fetch_add(tasks.len() as u64, Ordering::Relaxed);
                    tracing::debug!(worker = id, tasks = tasks.len(), "Evaluating batch");
                    self.dispatcher.evaluate_batch(tasks).await;
                }
                Err(e) => {
                    self.dequeue_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(worker = id, error = %e, "Dequeue failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.dequeue_timeout) => {}
                        _ = shutdown.recv() => break,
                    }
                }
            }
        }

        self.active.fetch_sub(1, Ordering::Relaxed);
        tracing::debug!(worker = id, "Evaluation worker stopped");
    }
}
