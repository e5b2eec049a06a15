//! Vigil node
//!
//! Run with: cargo run
//!
//! Every node runs the full pipeline: catalog and notification-state refresh
//! loops, the lease-based scheduler, the evaluation worker pool and the
//! operator API. See [`vigil::config`] for environment variables.
//!
//! Optional adapters:
//! - `--features kafka`: use Kafka as the dispatch queue when `KAFKA_BROKERS` is set
//! - `--features redis-lease`: use Redis for leases when `VIGIL_REDIS_URL` is set

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil::api::{run_server, AppState};
use vigil::catalog::{AlertCatalogCache, AlertStore, InMemoryAlertStore};
use vigil::clock::{Clock, SystemClock};
use vigil::cluster::{Coordinator, InMemoryCoordinator};
use vigil::dispatch::NotificationDispatcher;
use vigil::notify::NotifierRegistry;
use vigil::queue::{DispatchQueue, InMemoryQueue, ALERT_TOPIC};
use vigil::refresh::spawn_periodic;
use vigil::schedule::{DistributedScheduler, Scheduler};
use vigil::source::{HttpMetricSource, InMemoryMetricSource, MetricDataSource};
use vigil::state::{InMemoryNotificationStateStore, NotificationStateCache, NotificationStateStore};
use vigil::worker::EvaluationWorkerPool;
use vigil::{shutdown, VigilConfig};

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = VigilConfig::from_env()?;

    tracing::info!("Vigil configuration:");
    tracing::info!("  API: {}:{}", config.host, config.port);
    tracing::info!("  Node ID: {}", config.lease.node_id);
    tracing::info!("  Scheduling enabled: {}", config.scheduling_enabled);
    tracing::info!("  Partitions: {}", config.lease.partitions);
    tracing::info!(
        "  Lease TTL / refresh: {:?} / {:?}",
        config.lease.ttl,
        config.lease.refresh_period
    );
    tracing::info!("  Workers: {}", config.worker.workers);
    tracing::info!(
        "  Catalog / state refresh: {:?} / {:?}",
        config.catalog_refresh,
        config.state_refresh
    );

    println!(
        r#"
 __      ___       _ _
 \ \    / (_)     (_) |
  \ \  / / _  __ _ _| |
   \ \/ / | |/ _` | | |
    \  /  | | (_| | | |
     \/   |_|\__, |_|_|
              __/ |
             |___/

 Distributed Cron-Scheduled Alert Evaluation
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (shutdown_trigger, shutdown) = shutdown::channel();

    let alert_store: Arc<dyn AlertStore> = Arc::new(InMemoryAlertStore::new());
    let state_store: Arc<dyn NotificationStateStore> =
        Arc::new(InMemoryNotificationStateStore::new());
    let catalog = Arc::new(AlertCatalogCache::new(alert_store.clone(), clock.clone()));
    let state_cache = Arc::new(NotificationStateCache::new(state_store, clock.clone()));

    let source: Arc<dyn MetricDataSource> = match &config.metrics_url {
        Some(url) => {
            tracing::info!("  Metric source: {}", url);
            Arc::new(HttpMetricSource::new(url.as_str(), config.worker.query_timeout)?)
        }
        None => {
            tracing::info!("  Metric source: in-memory");
            Arc::new(InMemoryMetricSource::new())
        }
    };
    let (queue, topic) = build_queue()?;
    let coordinator = build_coordinator(clock.clone()).await?;

    let dispatcher = Arc::new(
        NotificationDispatcher::new(
            alert_store,
            state_cache.clone(),
            source,
            NotifierRegistry::with_log_notifiers(),
            clock.clone(),
        )
        .with_config(config.worker.dispatcher_config()),
    );
    let scheduler = Arc::new(
        DistributedScheduler::new(
            config.lease.clone(),
            catalog.clone(),
            queue.clone(),
            coordinator,
            clock,
        )
        .with_topic(topic.clone()),
    );
    scheduler.set_enabled(config.scheduling_enabled);
    let workers = Arc::new(
        EvaluationWorkerPool::new(config.worker.clone(), queue, dispatcher.clone())
            .with_topic(topic),
    );

    // Background loops
    let mut handles = vec![
        spawn_periodic(catalog.clone(), config.catalog_refresh, shutdown.clone()),
        spawn_periodic(state_cache.clone(), config.state_refresh, shutdown.clone()),
    ];
    handles.push({
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    });
    handles.extend(workers.clone().start(shutdown.clone()));

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received, stopping...");
                shutdown_trigger.trigger();
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
                // keep the trigger alive; dropping it would stop the node
                std::future::pending::<()>().await;
            }
        }
    });

    let state = Arc::new(AppState {
        catalog,
        state_cache,
        dispatcher,
        scheduler,
        workers: Some(workers),
    });
    run_server(&config.host, config.port, state, shutdown).await?;

    // Scheduler loops release their leases on the way out
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    tracing::info!("Vigil stopped");
    Ok(())
}

#[cfg(feature = "kafka")]
fn build_queue() -> Result<(Arc<dyn DispatchQueue>, String), BoxError> {
    use vigil::queue::{KafkaQueue, KafkaQueueConfig};

    if let Some(kafka) = KafkaQueueConfig::from_env() {
        tracing::info!("  Dispatch queue: Kafka {} topic {}", kafka.brokers, kafka.topic);
        let topic = kafka.topic.clone();
        return Ok((Arc::new(KafkaQueue::new(kafka)?), topic));
    }
    tracing::info!("  Dispatch queue: in-memory");
    Ok((Arc::new(InMemoryQueue::new()), ALERT_TOPIC.to_string()))
}

#[cfg(not(feature = "kafka"))]
fn build_queue() -> Result<(Arc<dyn DispatchQueue>, String), BoxError> {
    tracing::info!("  Dispatch queue: in-memory");
    Ok((Arc::new(InMemoryQueue::new()), ALERT_TOPIC.to_string()))
}

#[cfg(feature = "redis-lease")]
async fn build_coordinator(clock: Arc<dyn Clock>) -> Result<Arc<dyn Coordinator>, BoxError> {
    use vigil::cluster::RedisCoordinator;

    match std::env::var("VIGIL_REDIS_URL") {
        Ok(url) if !url.trim().is_empty() => {
            tracing::info!("  Lease coordinator: Redis");
            Ok(Arc::new(RedisCoordinator::connect(&url).await?))
        }
        _ => {
            tracing::info!("  Lease coordinator: in-memory (single node)");
            Ok(Arc::new(InMemoryCoordinator::new(clock)))
        }
    }
}

#[cfg(not(feature = "redis-lease"))]
async fn build_coordinator(clock: Arc<dyn Clock>) -> Result<Arc<dyn Coordinator>, BoxError> {
    tracing::info!("  Lease coordinator: in-memory (single node)");
    Ok(Arc::new(InMemoryCoordinator::new(clock)))
}
