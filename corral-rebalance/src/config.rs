use corral_core::DEFAULT_CAPACITY_KEY;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::errors::{RebalanceError, Result};

/// How free replica slots are handed out to candidate participants
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    /// Lowest aggregated weight first, then fewest replicas (default)
    LeastUsed,
    /// Fewest replicas first, weights only matter for capacity checks
    Fair,
}

impl Default for PlacementStrategy {
    fn default() -> Self {
        Self::LeastUsed
    }
}

/// Rebalance configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Enable/disable the periodic controller pass
    pub enabled: bool,
    /// Controller pass interval (milliseconds)
    pub check_interval_ms: u64,
    /// Placement strategy for replicas that have to move
    pub strategy: PlacementStrategy,
    /// Candidates diverging more than this from the live assignment are not published.
    /// 1.0 accepts everything.
    pub max_divergence: f64,
    /// Capacity key partition weights are accounted against
    pub capacity_key: String,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: 1000,
            strategy: PlacementStrategy::LeastUsed,
            max_divergence: 1.0,
            capacity_key: DEFAULT_CAPACITY_KEY.to_string(),
        }
    }
}

impl RebalanceConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Whether a candidate with this divergence may replace the live assignment
    pub fn accepts(&self, divergence: f64) -> bool {
        divergence <= self.max_divergence
    }

    pub fn validate(&self) -> Result<()> {
        if self.check_interval_ms == 0 {
            return Err(RebalanceError::InvalidConfig(
                "check_interval_ms must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_divergence) {
            return Err(RebalanceError::InvalidConfig(format!(
                "max_divergence must be within [0.0, 1.0], got {}",
                self.max_divergence
            )));
        }
        if self.capacity_key.is_empty() {
            return Err(RebalanceError::InvalidConfig(
                "capacity_key must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Partition weights known ahead of time
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WeightConfig {
    /// Weight of a partition nothing else is known about
    #[serde(default = "default_weight")]
    pub default_weight: i64,
    /// resource -> weight of each of its partitions
    #[serde(default)]
    pub resource_defaults: BTreeMap<String, i64>,
    /// resource -> partition -> capacity key -> weight
    #[serde(default)]
    pub partitions: BTreeMap<String, BTreeMap<String, BTreeMap<String, i64>>>,
}

fn default_weight() -> i64 {
    1
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            default_weight: default_weight(),
            resource_defaults: BTreeMap::new(),
            partitions: BTreeMap::new(),
        }
    }
}
