//! Cron matching and distributed scheduling

pub mod cron;
pub mod partition;
pub mod scheduler;

pub use self::cron::{CronCache, CronEntry, CronError};
pub use partition::{lease_purpose, HashPartitioner, ModuloPartitioner, PartitionStrategy};
pub use scheduler::{
    DistributedScheduler, PartitionRunner, PartitionStatus, Scheduler, SchedulerState,
    SchedulerStatus,
};
