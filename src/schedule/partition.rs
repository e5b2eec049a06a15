//! Assignment of alerts to scheduling partitions

use crate::data::AlertId;

/// Maps an alert to the partition whose lease holder schedules it
pub trait PartitionStrategy: Send + Sync {
    fn partition_of(&self, alert_id: AlertId, partitions: u32) -> u32;
}

/// Spreads alerts by a hash of their id
#[derive(Debug, Default, Clone, Copy)]
pub struct HashPartitioner;

impl PartitionStrategy for HashPartitioner {
    fn partition_of(&self, alert_id: AlertId, partitions: u32) -> u32 {
        if partitions <= 1 {
            return 0;
        }
        (fxhash::hash64(&alert_id) % partitions as u64) as u32
    }
}

/// Assigns alerts round-robin by id
#[derive(Debug, Default, Clone, Copy)]
pub struct ModuloPartitioner;

impl PartitionStrategy for ModuloPartitioner {
    fn partition_of(&self, alert_id: AlertId, partitions: u32) -> u32 {
        if partitions <= 1 {
            return 0;
        }
        (alert_id % partitions as u64) as u32
    }
}

/// Lease purpose guarding one partition
pub fn lease_purpose(partition: u32) -> String {
    format!("schedule-{}", partition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_partition() {
        assert_eq!(HashPartitioner.partition_of(42, 1), 0);
        assert_eq!(ModuloPartitioner.partition_of(42, 0), 0);
    }

    #[test]
    fn test_hash_partitioner_is_stable_and_in_range() {
        for id in 0..1000u64 {
            let p = HashPartitioner.partition_of(id, 4);
            assert!(p < 4);
            assert_eq!(p, HashPartitioner.partition_of(id, 4));
        }
    }

    #[test]
    fn test_modulo_partitioner() {
        assert_eq!(ModuloPartitioner.partition_of(7, 3), 1);
        assert_eq!(lease_purpose(2), "schedule-2");
    }
}
