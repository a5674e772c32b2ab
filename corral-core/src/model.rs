use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::ModelError;
use crate::state_model::StateModelDefinition;

/// Capacity key used when a participant or partition declares a single weight.
pub const DEFAULT_CAPACITY_KEY: &str = "weight";

/// A worker process able to host replicas.
///
/// Liveness is not a field: a participant is live while its registration
/// exists in the coordination service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    /// capacity key -> capacity. Keys that are not declared are not limited.
    #[serde(default)]
    pub capacity: BTreeMap<String, i64>,
}

impl Participant {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            capacity: BTreeMap::new(),
        }
    }

    pub fn with_capacity(mut self, key: &str, capacity: i64) -> Self {
        self.capacity.insert(key.to_string(), capacity);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub name: String,
    pub num_partitions: u32,
    /// replication factor
    pub replicas: u32,
    /// name of the state model definition governing the replicas
    pub state_model: String,
}

impl ResourceDefinition {
    pub fn partition_name(&self, index: u32) -> String {
        format!("{}_{}", self.name, index)
    }

    pub fn partition_names(&self) -> Vec<String> {
        (0..self.num_partitions)
            .map(|i| self.partition_name(i))
            .collect()
    }
}

/// One (partition, participant) pairing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId {
    pub resource: String,
    pub partition: String,
    pub participant: String,
}

impl ReplicaId {
    pub fn new(resource: &str, partition: &str, participant: &str) -> Self {
        Self {
            resource: resource.to_string(),
            partition: partition.to_string(),
            participant: participant.to_string(),
        }
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.resource, self.partition, self.participant)
    }
}

/// participant -> state
pub type PartitionStateMap = BTreeMap<String, String>;

/// partition -> participant -> state
pub type ResourceStateMap = BTreeMap<String, PartitionStateMap>;

/// resource -> partition -> participant -> state
///
/// Backed by ordered maps so serialization and iteration are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Assignment(BTreeMap<String, ResourceStateMap>);

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.replica_count() == 0
    }

    pub fn resources(&self) -> impl Iterator<Item = (&String, &ResourceStateMap)> {
        self.0.iter()
    }

    pub fn resource(&self, resource: &str) -> Option<&ResourceStateMap> {
        self.0.get(resource)
    }

    pub fn partition(&self, resource: &str, partition: &str) -> Option<&PartitionStateMap> {
        self.0.get(resource).and_then(|r| r.get(partition))
    }

    pub fn state_of(&self, replica: &ReplicaId) -> Option<&str> {
        self.partition(&replica.resource, &replica.partition)
            .and_then(|p| p.get(&replica.participant))
            .map(String::as_str)
    }

    pub fn set_replica(&mut self, resource: &str, partition: &str, participant: &str, state: &str) {
        self.0
            .entry(resource.to_string())
            .or_default()
            .entry(partition.to_string())
            .or_default()
            .insert(participant.to_string(), state.to_string());
    }

    /// Records a partition with no replicas, so it is listed even when nothing
    /// could be placed.
    pub fn ensure_partition(&mut self, resource: &str, partition: &str) {
        self.0
            .entry(resource.to_string())
            .or_default()
            .entry(partition.to_string())
            .or_default();
    }

    /// Every (replica, state) pair in resource, partition, participant order.
    pub fn replicas(&self) -> impl Iterator<Item = (ReplicaId, &str)> {
        self.0.iter().flat_map(|(resource, partitions)| {
            partitions.iter().flat_map(move |(partition, states)| {
                states.iter().map(move |(participant, state)| {
                    (
                        ReplicaId::new(resource, partition, participant),
                        state.as_str(),
                    )
                })
            })
        })
    }

    pub fn replica_count(&self) -> usize {
        self.0
            .values()
            .flat_map(|partitions| partitions.values())
            .map(|states| states.len())
            .sum()
    }

    /// Replicas hosted by one participant.
    pub fn replicas_of(&self, participant: &str) -> BTreeMap<ReplicaId, String> {
        self.replicas()
            .filter(|(replica, _)| replica.participant == participant)
            .map(|(replica, state)| (replica, state.to_string()))
            .collect()
    }

    /// Checks the structural invariants: every partition holds at most
    /// `replicas` participants and every state is placeable by the resource's model.
    pub fn validate(
        &self,
        resources: &BTreeMap<String, ResourceDefinition>,
        state_models: &BTreeMap<String, StateModelDefinition>,
    ) -> Result<(), ModelError> {
        for (resource_name, partitions) in &self.0 {
            let resource = resources
                .get(resource_name)
                .ok_or_else(|| ModelError::UnknownResource(resource_name.clone()))?;
            let model = state_models
                .get(&resource.state_model)
                .ok_or_else(|| ModelError::UnknownStateModel(resource.state_model.clone()))?;

            for (partition, states) in partitions {
                if states.len() > resource.replicas as usize {
                    return Err(ModelError::TooManyReplicas {
                        partition: partition.clone(),
                        assigned: states.len(),
                        replicas: resource.replicas,
                    });
                }
                for state in states.values() {
                    if !model.placed_states().any(|s| s == state.as_str()) {
                        return Err(ModelError::IllegalState {
                            partition: partition.clone(),
                            state: state.clone(),
                            model: model.name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl FromIterator<(ReplicaId, String)> for Assignment {
    fn from_iter<I: IntoIterator<Item = (ReplicaId, String)>>(iter: I) -> Self {
        let mut assignment = Assignment::new();
        for (replica, state) in iter {
            assignment.set_replica(
                &replica.resource,
                &replica.partition,
                &replica.participant,
                &state,
            );
        }
        assignment
    }
}
