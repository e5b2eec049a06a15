//! Process configuration from environment variables
//!
//! - `VIGIL_HOST` / `VIGIL_PORT`: ops API bind address (default 0.0.0.0:8090)
//! - `VIGIL_SCHEDULING_ENABLED`: publish due alerts from this node (default true)
//! - `VIGIL_CATALOG_REFRESH_SECS`: alert catalog refresh period (default 60)
//! - `VIGIL_STATE_REFRESH_SECS`: notification state refresh period (default 60)
//! - `VIGIL_METRICS_URL`: remote metric source; in-memory source when unset
//! - lease settings: see [`LeaseConfig::from_env`]
//! - worker settings: see [`WorkerConfig::from_env`]

use std::str::FromStr;
use std::time::Duration;

use crate::cluster::LeaseConfig;
use crate::worker::WorkerConfig;

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct VigilConfig {
    pub host: String,
    pub port: u16,
    pub scheduling_enabled: bool,
    pub catalog_refresh: Duration,
    pub state_refresh: Duration,
    pub metrics_url: Option<String>,
    pub lease: LeaseConfig,
    pub worker: WorkerConfig,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            scheduling_enabled: true,
            catalog_refresh: Duration::from_secs(60),
            state_refresh: Duration::from_secs(60),
            metrics_url: None,
            lease: LeaseConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl VigilConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            host: std::env::var("VIGIL_HOST").unwrap_or(defaults.host),
            port: env_or("VIGIL_PORT", defaults.port)?,
            scheduling_enabled: env_or("VIGIL_SCHEDULING_ENABLED", defaults.scheduling_enabled)?,
            catalog_refresh: Duration::from_secs(env_or(
                "VIGIL_CATALOG_REFRESH_SECS",
                defaults.catalog_refresh.as_secs(),
            )?),
            state_refresh: Duration::from_secs(env_or(
                "VIGIL_STATE_REFRESH_SECS",
                defaults.state_refresh.as_secs(),
            )?),
            metrics_url: std::env::var("VIGIL_METRICS_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            lease: LeaseConfig::from_env()?,
            worker: WorkerConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.catalog_refresh.is_zero() || self.state_refresh.is_zero() {
            return Err(ConfigError::Invalid(
                "cache refresh periods must be positive".to_string(),
            ));
        }
        self.lease.validate()?;
        self.worker.validate()?;
        Ok(())
    }
}

/// Read and parse an environment variable, falling back to `default` when unset
pub fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::Parse {
                name: name.to_string(),
                value: raw,
            })
        }
        _ => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot parse {name}={value}")]
    Parse { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
