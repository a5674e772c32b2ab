use corral_core::{Assignment, DEFAULT_CAPACITY_KEY};
use std::collections::BTreeMap;

use crate::config::WeightConfig;

/// capacity key -> amount
pub type CapacityMap = BTreeMap<String, i64>;

/// Source of partition weights.
///
/// Implementations must be pure lookups: the rebalancer calls them many times
/// per pass and relies on getting the same answer every time.
pub trait PartitionWeightProvider: Send + Sync {
    /// Weight of one replica of `partition`, on the provider's capacity key.
    fn partition_weight(&self, resource: &str, partition: &str) -> i64;

    /// Key `partition_weight` is accounted against.
    fn capacity_key(&self) -> &str {
        DEFAULT_CAPACITY_KEY
    }

    /// Full per-key cost of one replica of `partition`.
    fn partition_capacity(&self, resource: &str, partition: &str) -> CapacityMap {
        CapacityMap::from([(
            self.capacity_key().to_string(),
            self.partition_weight(resource, partition),
        )])
    }
}

/// Aggregated weight per participant over every replica in `assignment`.
///
/// Always a full reduction over the assignment. Participants without replicas
/// are absent from the result. Totals saturate at `i64::MAX`.
pub fn compute_usage(
    assignment: &Assignment,
    weights: &dyn PartitionWeightProvider,
) -> BTreeMap<String, i64> {
    let mut usage: BTreeMap<String, i64> = BTreeMap::new();
    for (replica, _) in assignment.replicas() {
        let total = usage.entry(replica.participant).or_default();
        let weight = weights.partition_weight(&replica.resource, &replica.partition);
        *total = total.saturating_add(weight);
    }
    usage
}

/// Like [`compute_usage`] but for every capacity key the partitions declare.
pub fn compute_usage_by_key(
    assignment: &Assignment,
    weights: &dyn PartitionWeightProvider,
) -> BTreeMap<String, CapacityMap> {
    let mut usage: BTreeMap<String, CapacityMap> = BTreeMap::new();
    for (replica, _) in assignment.replicas() {
        let participant = usage.entry(replica.participant.clone()).or_default();
        for (key, weight) in weights.partition_capacity(&replica.resource, &replica.partition) {
            let total = participant.entry(key).or_default();
            *total = total.saturating_add(weight);
        }
    }
    usage
}

/// Average weight per capacity key over the partitions declaring that key.
///
/// Integer division, truncating. Keys no partition declares are absent.
pub fn average_partition_weight(
    partition_capacity: &BTreeMap<String, CapacityMap>,
) -> CapacityMap {
    let mut totals: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
    for capacity in partition_capacity.values() {
        for (key, weight) in capacity {
            let (count, total) = totals.entry(key.as_str()).or_default();
            *count += 1;
            *total = total.saturating_add(*weight);
        }
    }

    totals
        .into_iter()
        .map(|(key, (count, total))| (key.to_string(), total / count))
        .collect()
}

/// Weight provider backed by [`WeightConfig`].
///
/// A partition's weight is resolved from, in order: its own capacity map, the
/// average over the resource's declared partitions, the resource default, and
/// the global default.
#[derive(Debug, Clone)]
pub struct ConfiguredWeightProvider {
    config: WeightConfig,
    capacity_key: String,
    averages: BTreeMap<String, CapacityMap>,
}

impl ConfiguredWeightProvider {
    pub fn new(config: WeightConfig, capacity_key: &str) -> Self {
        let averages = config
            .partitions
            .iter()
            .map(|(resource, partitions)| (resource.clone(), average_partition_weight(partitions)))
            .collect();

        Self {
            config,
            capacity_key: capacity_key.to_string(),
            averages,
        }
    }

    fn declared(&self, resource: &str, partition: &str) -> Option<&CapacityMap> {
        self.config.partitions.get(resource)?.get(partition)
    }
}

impl PartitionWeightProvider for ConfiguredWeightProvider {
    fn partition_weight(&self, resource: &str, partition: &str) -> i64 {
        let key = self.capacity_key.as_str();
        self.declared(resource, partition)
            .and_then(|capacity| capacity.get(key))
            .or_else(|| self.averages.get(resource).and_then(|avg| avg.get(key)))
            .or_else(|| self.config.resource_defaults.get(resource))
            .copied()
            .unwrap_or(self.config.default_weight)
    }

    fn capacity_key(&self) -> &str {
        &self.capacity_key
    }

    fn partition_capacity(&self, resource: &str, partition: &str) -> CapacityMap {
        let mut capacity = self
            .declared(resource, partition)
            .cloned()
            .unwrap_or_default();
        capacity
            .entry(self.capacity_key.clone())
            .or_insert_with(|| self.partition_weight(resource, partition));
        capacity
    }
}
