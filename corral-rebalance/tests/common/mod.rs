//! Shared fixtures for `corral-rebalance` integration tests.
//!
//! [`Cluster`] describes a cluster snapshot (participants, resources, weights)
//! and builds the engine and the input of a rebalance pass from it.

#![allow(dead_code)]

use corral_core::{Assignment, Participant, ResourceDefinition, StateModelDefinition};
use corral_rebalance::{
    ConfiguredWeightProvider, RebalanceConfig, RebalanceEngine, RebalanceInput, WeightConfig,
};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Cluster {
    pub participants: Vec<Participant>,
    pub resources: Vec<ResourceDefinition>,
    pub weights: WeightConfig,
    pub config: RebalanceConfig,
}

impl Cluster {
    /// `count` participants named node-0.. with the given capacity on the default key.
    pub fn with_nodes(count: usize, capacity: Option<i64>) -> Self {
        let participants = (0..count)
            .map(|i| {
                let participant = Participant::new(&format!("node-{i}"));
                match capacity {
                    Some(c) => participant.with_capacity("weight", c),
                    None => participant,
                }
            })
            .collect();

        Self {
            participants,
            ..Default::default()
        }
    }

    pub fn resource(mut self, name: &str, partitions: u32, replicas: u32, model: &str) -> Self {
        self.resources.push(ResourceDefinition {
            name: name.to_string(),
            num_partitions: partitions,
            replicas,
            state_model: model.to_string(),
        });
        self
    }

    pub fn resource_weight(mut self, resource: &str, weight: i64) -> Self {
        self.weights
            .resource_defaults
            .insert(resource.to_string(), weight);
        self
    }

    pub fn without(mut self, participant: &str) -> Self {
        self.participants.retain(|p| p.name != participant);
        self
    }

    pub fn engine(&self) -> RebalanceEngine {
        let weights = ConfiguredWeightProvider::new(self.weights.clone(), &self.config.capacity_key);
        RebalanceEngine::new(self.config.clone(), Arc::new(weights))
    }

    pub fn input(&self, previous: Assignment) -> RebalanceInput {
        RebalanceInput::new(
            self.participants.clone(),
            self.resources.clone(),
            [
                StateModelDefinition::leader_standby(),
                StateModelDefinition::online_offline(),
            ],
            previous,
        )
    }

    pub fn resource_map(&self) -> BTreeMap<String, ResourceDefinition> {
        self.resources
            .iter()
            .map(|r| (r.name.clone(), r.clone()))
            .collect()
    }

    pub fn state_model_map(&self) -> BTreeMap<String, StateModelDefinition> {
        [
            StateModelDefinition::leader_standby(),
            StateModelDefinition::online_offline(),
        ]
        .into_iter()
        .map(|m| (m.name.clone(), m))
        .collect()
    }
}

/// A mid-sized cluster with mixed weights and both built-in state models.
pub fn sample_cluster() -> Cluster {
    Cluster::with_nodes(5, Some(40))
        .resource("orders", 8, 3, "LeaderStandby")
        .resource("sessions", 6, 2, "OnlineOffline")
        .resource("search", 4, 2, "LeaderStandby")
        .resource_weight("orders", 3)
        .resource_weight("search", 5)
}
