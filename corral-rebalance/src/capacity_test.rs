//! Tests for the capacity model: usage aggregation, partition weight averages
//! and weight resolution of the configured provider.

use corral_core::Assignment;
use std::collections::BTreeMap;

use crate::capacity::*;
use crate::config::WeightConfig;

fn capacity(entries: &[(&str, i64)]) -> CapacityMap {
    entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn weights() -> ConfiguredWeightProvider {
    let mut partitions = BTreeMap::new();
    partitions.insert(
        "orders".to_string(),
        BTreeMap::from([
            ("orders_0".to_string(), capacity(&[("weight", 10), ("disk", 3)])),
            ("orders_1".to_string(), capacity(&[("weight", 21)])),
            ("orders_2".to_string(), capacity(&[("disk", 8)])),
        ]),
    );

    ConfiguredWeightProvider::new(
        WeightConfig {
            default_weight: 1,
            resource_defaults: BTreeMap::from([
                ("logs".to_string(), 4),
                ("orders".to_string(), 9),
            ]),
            partitions,
        },
        "weight",
    )
}

/// **Test:** Usage Of An Empty Assignment
///
/// **Reason:** Usage is a pure reduction; with nothing placed there is nothing to report.
///
/// **Expectation:** An empty mapping, not participants with zero.
#[test]
fn test_usage_of_empty_assignment_is_empty() {
    assert!(compute_usage(&Assignment::new(), &weights()).is_empty());
    assert!(compute_usage_by_key(&Assignment::new(), &weights()).is_empty());
}

/// **Test:** Usage Sums Partition Weights Per Participant
///
/// **Reason:** The sum over participants must equal the total weight of the
/// placed replicas, whatever state each replica is in.
///
/// **Expectation:** node-1 holds orders_0 (10) and logs_0 (4), node-2 holds
/// orders_0 (10) and orders_1 (21); totals add up to 45.
#[test]
fn test_usage_sums_partition_weights() {
    let mut assignment = Assignment::new();
    assignment.set_replica("orders", "orders_0", "node-1", "LEADER");
    assignment.set_replica("orders", "orders_0", "node-2", "STANDBY");
    assignment.set_replica("orders", "orders_1", "node-2", "LEADER");
    assignment.set_replica("logs", "logs_0", "node-1", "ONLINE");

    let usage = compute_usage(&assignment, &weights());
    assert_eq!(
        usage,
        BTreeMap::from([("node-1".to_string(), 14), ("node-2".to_string(), 31)])
    );
    assert_eq!(usage.values().sum::<i64>(), 10 + 10 + 21 + 4);
}

/// **Test:** Zero Weight Replicas Still Show Up
///
/// **Reason:** A participant is reported as soon as it hosts a replica, even
/// when that replica costs nothing.
///
/// **Expectation:** node-3 is present with usage 0.
#[test]
fn test_zero_weight_replica_is_reported() {
    let provider = ConfiguredWeightProvider::new(
        WeightConfig {
            default_weight: 0,
            ..Default::default()
        },
        "weight",
    );
    let mut assignment = Assignment::new();
    assignment.set_replica("cache", "cache_0", "node-3", "ONLINE");

    assert_eq!(
        compute_usage(&assignment, &provider),
        BTreeMap::from([("node-3".to_string(), 0)])
    );
}

/// **Test:** Average Partition Weight
///
/// **Reason:** The average is used as the cost of partitions without their own
/// weights and must truncate like integer division.
///
/// **Expectation:** {c1: 66/3, c2: 120/3} = {c1: 22, c2: 40}.
#[test]
fn test_average_partition_weight() {
    let partitions = BTreeMap::from([
        ("p1".to_string(), capacity(&[("c1", 20), ("c2", 40)])),
        ("p2".to_string(), capacity(&[("c1", 30), ("c2", 50)])),
        ("p3".to_string(), capacity(&[("c1", 16), ("c2", 30)])),
    ]);

    assert_eq!(
        average_partition_weight(&partitions),
        capacity(&[("c1", 22), ("c2", 40)])
    );
}

/// **Test:** Average Over Partially Declared Keys
///
/// **Reason:** Each key is averaged over the partitions declaring it, not over
/// all partitions.
///
/// **Expectation:** c1 = (10 + 21) / 2 = 15, c2 = 7, and no other key.
#[test]
fn test_average_partition_weight_partial_keys() {
    let partitions = BTreeMap::from([
        ("p1".to_string(), capacity(&[("c1", 10)])),
        ("p2".to_string(), capacity(&[("c1", 21), ("c2", 7)])),
    ]);

    assert_eq!(
        average_partition_weight(&partitions),
        capacity(&[("c1", 15), ("c2", 7)])
    );
    assert!(average_partition_weight(&BTreeMap::new()).is_empty());
}

/// **Test:** Weight Resolution Order
///
/// **Reason:** The configured provider must prefer the most specific weight it knows.
///
/// **Expectation:** explicit partition weight, then the resource average, then
/// the resource default, then the global default.
#[test]
fn test_configured_weight_resolution() {
    let provider = weights();

    assert_eq!(provider.partition_weight("orders", "orders_0"), 10);
    assert_eq!(provider.partition_weight("orders", "orders_2"), 15);
    assert_eq!(provider.partition_weight("orders", "orders_7"), 15);
    assert_eq!(provider.partition_weight("logs", "logs_0"), 4);
    assert_eq!(provider.partition_weight("metrics", "metrics_0"), 1);
}

/// **Test:** Partition Capacity Covers Every Declared Key
///
/// **Reason:** Capacity checks run on every key a partition declares, plus the
/// provider's own capacity key.
///
/// **Expectation:** Declared keys are kept and the capacity key is filled in
/// from the resolved weight when missing.
#[test]
fn test_configured_partition_capacity() {
    let provider = weights();

    assert_eq!(
        provider.partition_capacity("orders", "orders_0"),
        capacity(&[("disk", 3), ("weight", 10)])
    );
    assert_eq!(
        provider.partition_capacity("orders", "orders_2"),
        capacity(&[("disk", 8), ("weight", 15)])
    );
    assert_eq!(
        provider.partition_capacity("logs", "logs_0"),
        capacity(&[("weight", 4)])
    );
}

/// **Test:** Custom Capacity Key
///
/// **Reason:** The capacity key is configurable; weights are then read from that key.
///
/// **Expectation:** orders_0 weighs 3 on disk, orders_1 falls back to the disk
/// average (3 + 8) / 2.
#[test]
fn test_custom_capacity_key() {
    let provider = ConfiguredWeightProvider::new(weights_config(), "disk");

    assert_eq!(provider.capacity_key(), "disk");
    assert_eq!(provider.partition_weight("orders", "orders_0"), 3);
    assert_eq!(provider.partition_weight("orders", "orders_1"), 5);
}

fn weights_config() -> WeightConfig {
    let mut partitions = BTreeMap::new();
    partitions.insert(
        "orders".to_string(),
        BTreeMap::from([
            ("orders_0".to_string(), capacity(&[("weight", 10), ("disk", 3)])),
            ("orders_2".to_string(), capacity(&[("disk", 8)])),
        ]),
    );
    WeightConfig {
        partitions,
        ..Default::default()
    }
}

/// **Test:** Usage Per Capacity Key
///
/// **Expectation:** Every key of every placed partition is summed per participant.
#[test]
fn test_usage_by_key() {
    let mut assignment = Assignment::new();
    assignment.set_replica("orders", "orders_0", "node-1", "LEADER");
    assignment.set_replica("orders", "orders_2", "node-1", "LEADER");

    let usage = compute_usage_by_key(&assignment, &weights());
    assert_eq!(
        usage.get("node-1"),
        Some(&capacity(&[("disk", 11), ("weight", 25)]))
    );
}
