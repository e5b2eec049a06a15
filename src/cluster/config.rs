use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{env_or, ConfigError};

/// Lease timing for the distributed scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// This node's ID, recorded as the lease note
    pub node_id: String,
    /// Lease lifetime
    pub ttl: Duration,
    /// How often a held lease is extended; must be shorter than `ttl`
    pub refresh_period: Duration,
    /// Wait between failed acquisition attempts
    pub acquire_backoff: Duration,
    /// Upper bound on a single coordinator call
    pub acquire_timeout: Duration,
    /// Number of scheduling partitions; each has its own lease
    pub partitions: u32,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            ttl: Duration::from_secs(15 * 60),
            refresh_period: Duration::from_secs(14 * 60),
            acquire_backoff: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(10),
            partitions: 1,
        }
    }
}

impl LeaseConfig {
    /// Read `VIGIL_NODE_ID`, `VIGIL_PARTITIONS` and `VIGIL_LEASE_*`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            node_id: std::env::var("VIGIL_NODE_ID").unwrap_or(defaults.node_id),
            ttl: Duration::from_secs(env_or("VIGIL_LEASE_TTL_SECS", defaults.ttl.as_secs())?),
            refresh_period: Duration::from_secs(env_or(
                "VIGIL_LEASE_REFRESH_SECS",
                defaults.refresh_period.as_secs(),
            )?),
            acquire_backoff: Duration::from_secs(env_or(
                "VIGIL_LEASE_ACQUIRE_BACKOFF_SECS",
                defaults.acquire_backoff.as_secs(),
            )?),
            acquire_timeout: Duration::from_secs(env_or(
                "VIGIL_LEASE_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout.as_secs(),
            )?),
            partitions: env_or("VIGIL_PARTITIONS", defaults.partitions)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partitions == 0 {
            return Err(ConfigError::Invalid(
                "VIGIL_PARTITIONS must be at least 1".to_string(),
            ));
        }
        if self.refresh_period >= self.ttl {
            return Err(ConfigError::Invalid(format!(
                "lease refresh period {:?} must be shorter than ttl {:?}",
                self.refresh_period, self.ttl
            )));
        }
        if self.acquire_backoff.is_zero() {
            return Err(ConfigError::Invalid(
                "lease acquire backoff must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl.as_millis() as i64
    }
}
