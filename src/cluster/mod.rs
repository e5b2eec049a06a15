//! Cluster coordination: leases that grant scheduling authority

pub mod config;
pub mod coordinator;
pub mod memory;
#[cfg(feature = "redis-lease")]
pub mod redis_lease;

pub use config::LeaseConfig;
pub use coordinator::{Coordinator, CoordinatorError, LeaseKey};
pub use memory::InMemoryCoordinator;
#[cfg(feature = "redis-lease")]
pub use redis_lease::RedisCoordinator;
