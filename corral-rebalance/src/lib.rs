//! # Corral Rebalance
//!
//! Placement side of the Corral control plane:
//!
//! - [`capacity`]: partition weights, participant usage and the weight provider seam
//! - [`divergence`]: how much of a candidate assignment differs from a baseline
//! - [`RebalanceEngine`]: deterministic computation of the target assignment
//!   under capacity, liveness and state-model constraints

pub mod capacity;
mod config;
pub mod divergence;
mod engine;
mod errors;
pub mod rankings;

pub use capacity::{
    average_partition_weight, compute_usage, compute_usage_by_key, CapacityMap,
    ConfiguredWeightProvider, PartitionWeightProvider,
};
pub use config::{PlacementStrategy, RebalanceConfig, WeightConfig};
pub use divergence::measure_divergence;
pub use engine::{RebalanceEngine, RebalanceInput, RebalanceIssue, RebalanceOutcome};
pub use errors::{RebalanceError, Result};

#[cfg(test)]
mod capacity_test;
