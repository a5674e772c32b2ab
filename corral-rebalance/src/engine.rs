use corral_core::{Assignment, Participant, ResourceDefinition, StateModelDefinition};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::capacity::{compute_usage, CapacityMap, PartitionWeightProvider};
use crate::config::RebalanceConfig;
use crate::divergence::measure_divergence;
use crate::errors::{RebalanceError, Result};
use crate::rankings::{rank, ParticipantLoad};

/// Snapshot the rebalancer works on. Taken once before a pass and never
/// mutated while the pass runs.
#[derive(Debug, Clone, Default)]
pub struct RebalanceInput {
    /// live participants by name
    pub participants: BTreeMap<String, Participant>,
    pub resources: BTreeMap<String, ResourceDefinition>,
    pub state_models: BTreeMap<String, StateModelDefinition>,
    /// assignment currently published
    pub previous: Assignment,
}

impl RebalanceInput {
    pub fn new(
        participants: impl IntoIterator<Item = Participant>,
        resources: impl IntoIterator<Item = ResourceDefinition>,
        state_models: impl IntoIterator<Item = StateModelDefinition>,
        previous: Assignment,
    ) -> Self {
        Self {
            participants: participants
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
            resources: resources
                .into_iter()
                .map(|r| (r.name.clone(), r))
                .collect(),
            state_models: state_models
                .into_iter()
                .map(|m| (m.name.clone(), m))
                .collect(),
            previous,
        }
    }
}

/// Constraint the rebalancer could not satisfy for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RebalanceIssue {
    /// One replica does not fit on any live participant. It stays on `kept_on`,
    /// its previous placement, or is left unassigned when there was none.
    CapacityExceeded {
        resource: String,
        partition: String,
        kept_on: Option<String>,
    },
    /// Fewer replicas can be placed than the replication factor, either
    /// because too few participants are live or because the state model's
    /// role counts hold fewer replicas.
    UnderReplicated {
        resource: String,
        partition: String,
        required: u32,
        available: u32,
    },
}

impl fmt::Display for RebalanceIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebalanceIssue::CapacityExceeded {
                resource,
                partition,
                kept_on: Some(participant),
            } => write!(
                f,
                "capacity exceeded for {resource}/{partition}, replica kept on {participant}"
            ),
            RebalanceIssue::CapacityExceeded {
                resource,
                partition,
                kept_on: None,
            } => write!(
                f,
                "capacity exceeded for {resource}/{partition}, replica left unassigned"
            ),
            RebalanceIssue::UnderReplicated {
                resource,
                partition,
                required,
                available,
            } => write!(
                f,
                "{resource}/{partition} is under-replicated: {available} replicas placeable, {required} required"
            ),
        }
    }
}

/// Result of one rebalance pass.
#[derive(Debug, Clone, Serialize)]
pub struct RebalanceOutcome {
    pub assignment: Assignment,
    /// Divergence of `assignment` from the previous assignment
    pub divergence: f64,
    /// participant -> aggregated weight under `assignment`
    pub usage: BTreeMap<String, i64>,
    pub issues: Vec<RebalanceIssue>,
}

impl RebalanceOutcome {
    pub fn capacity_exceeded(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| matches!(i, RebalanceIssue::CapacityExceeded { .. }))
            .count()
    }

    pub fn under_replicated(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| matches!(i, RebalanceIssue::UnderReplicated { .. }))
            .count()
    }
}

/// Replica slots of one partition while a pass is running.
struct PartitionSlot<'a> {
    resource: &'a ResourceDefinition,
    model: &'a StateModelDefinition,
    partition: String,
    /// cost of one replica, per capacity key
    demand: CapacityMap,
    /// replicas the model's role counts can hold, at most the replication factor
    target: usize,
    /// live previous holders in a placeable state
    previous: BTreeMap<String, String>,
    chosen: Vec<String>,
    /// previous holders that no longer fit
    rejected: Vec<String>,
}

impl PartitionSlot<'_> {
    // Higher priority roles keep their participant first.
    fn sticky_order(&self) -> Vec<String> {
        let mut holders: Vec<(usize, &String)> = self
            .previous
            .iter()
            .map(|(participant, state)| {
                (
                    self.model.priority(state).unwrap_or(usize::MAX),
                    participant,
                )
            })
            .collect();
        holders.sort();
        holders.into_iter().map(|(_, p)| p.clone()).collect()
    }
}

/// Usage accumulated by the placements made so far in a pass.
struct Ledger<'a> {
    participants: &'a BTreeMap<String, Participant>,
    usage: BTreeMap<String, CapacityMap>,
    replicas: BTreeMap<String, usize>,
}

impl<'a> Ledger<'a> {
    fn new(participants: &'a BTreeMap<String, Participant>) -> Self {
        Self {
            participants,
            usage: BTreeMap::new(),
            replicas: BTreeMap::new(),
        }
    }

    /// Keys a participant does not declare are not limited.
    fn fits(&self, participant: &str, demand: &CapacityMap) -> bool {
        let Some(declared) = self.participants.get(participant) else {
            return false;
        };
        let used = self.usage.get(participant);

        demand.iter().all(|(key, weight)| match declared.capacity.get(key) {
            None => true,
            Some(limit) => {
                let current = used.and_then(|u| u.get(key)).copied().unwrap_or(0);
                current.checked_add(*weight).is_some_and(|total| total <= *limit)
            }
        })
    }

    fn place(&mut self, participant: &str, demand: &CapacityMap) {
        let usage = self.usage.entry(participant.to_string()).or_default();
        for (key, weight) in demand {
            let total = usage.entry(key.clone()).or_default();
            *total = total.saturating_add(*weight);
        }
        *self.replicas.entry(participant.to_string()).or_default() += 1;
    }

    fn loads(&self, capacity_key: &str, exclude: &[String]) -> Vec<ParticipantLoad> {
        self.participants
            .keys()
            .filter(|name| !exclude.contains(*name))
            .map(|name| ParticipantLoad {
                participant: name.clone(),
                weight: self
                    .usage
                    .get(name)
                    .and_then(|u| u.get(capacity_key))
                    .copied()
                    .unwrap_or(0),
                replicas: self.replicas.get(name).copied().unwrap_or(0),
            })
            .collect()
    }
}

/// Computes target assignments.
///
/// ## Algorithm:
/// 1. **Sticky pass** - every live previous holder keeps its replica if it still
///    fits its capacity, highest priority role first
/// 2. **Fill pass** - free slots go to the best ranked live participant that fits,
///    partitions in resource and partition order
/// 3. **Shortfall** - a replica that fits nowhere stays on its previous holder
///    (or is left unassigned) and is reported as `CapacityExceeded`; fewer live
///    participants or role slots than replicas is reported as `UnderReplicated`
/// 4. **Roles** - role counts are filled in priority order, each participant
///    keeping its previous role when possible
///
/// Every step iterates ordered maps or sorted vectors, so the same input always
/// yields the same assignment.
pub struct RebalanceEngine {
    config: RebalanceConfig,
    weights: Arc<dyn PartitionWeightProvider>,
}

impl fmt::Debug for RebalanceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebalanceEngine")
            .field("config", &self.config)
            .field("capacity_key", &self.weights.capacity_key())
            .finish()
    }
}

impl RebalanceEngine {
    pub fn new(config: RebalanceConfig, weights: Arc<dyn PartitionWeightProvider>) -> Self {
        Self { config, weights }
    }

    pub fn config(&self) -> &RebalanceConfig {
        &self.config
    }

    pub fn weights(&self) -> &dyn PartitionWeightProvider {
        self.weights.as_ref()
    }

    pub fn compute(&self, input: &RebalanceInput) -> Result<RebalanceOutcome> {
        let mut slots = self.partition_slots(input)?;
        let mut ledger = Ledger::new(&input.participants);
        let mut issues = Vec::new();

        for slot in &mut slots {
            for participant in slot.sticky_order().into_iter().take(slot.target) {
                if ledger.fits(&participant, &slot.demand) {
                    ledger.place(&participant, &slot.demand);
                    slot.chosen.push(participant);
                } else {
                    debug!(
                        resource = %slot.resource.name,
                        partition = %slot.partition,
                        participant = %participant,
                        "previous placement no longer fits capacity"
                    );
                    slot.rejected.push(participant);
                }
            }
        }

        let capacity_key = self.weights.capacity_key();
        for slot in &mut slots {
            let replicas = slot.resource.replicas as usize;
            let target = slot.target;

            if slot.chosen.len() < target {
                let candidates = ledger.loads(capacity_key, &slot.chosen);
                for participant in rank(self.config.strategy, &candidates) {
                    if slot.chosen.len() >= target {
                        break;
                    }
                    if ledger.fits(&participant, &slot.demand) {
                        ledger.place(&participant, &slot.demand);
                        slot.chosen.push(participant);
                    }
                }
            }

            let placeable = input.participants.len().min(target);
            if placeable < replicas {
                let issue = RebalanceIssue::UnderReplicated {
                    resource: slot.resource.name.clone(),
                    partition: slot.partition.clone(),
                    required: slot.resource.replicas,
                    available: placeable as u32,
                };
                warn!(issue = %issue, "rebalance constraint not met");
                issues.push(issue);
            }

            let mut short = placeable.saturating_sub(slot.chosen.len());
            for participant in std::mem::take(&mut slot.rejected) {
                if short == 0 {
                    break;
                }
                if slot.chosen.contains(&participant) {
                    continue;
                }
                ledger.place(&participant, &slot.demand);
                let issue = RebalanceIssue::CapacityExceeded {
                    resource: slot.resource.name.clone(),
                    partition: slot.partition.clone(),
                    kept_on: Some(participant.clone()),
                };
                warn!(issue = %issue, "rebalance constraint not met");
                issues.push(issue);
                slot.chosen.push(participant);
                short -= 1;
            }
            for _ in 0..short {
                let issue = RebalanceIssue::CapacityExceeded {
                    resource: slot.resource.name.clone(),
                    partition: slot.partition.clone(),
                    kept_on: None,
                };
                warn!(issue = %issue, "rebalance constraint not met");
                issues.push(issue);
            }
        }

        let assignment = assign_roles(&slots);
        let divergence = measure_divergence(&input.previous, &assignment);
        let usage = compute_usage(&assignment, self.weights.as_ref());

        info!(
            partitions = slots.len(),
            replicas = assignment.replica_count(),
            divergence,
            issues = issues.len(),
            "rebalance pass computed"
        );

        Ok(RebalanceOutcome {
            assignment,
            divergence,
            usage,
            issues,
        })
    }

    fn partition_slots<'a>(&self, input: &'a RebalanceInput) -> Result<Vec<PartitionSlot<'a>>> {
        let mut slots = Vec::new();

        for resource in input.resources.values() {
            if resource.replicas == 0 {
                return Err(RebalanceError::ZeroReplicas(resource.name.clone()));
            }
            let model = input.state_models.get(&resource.state_model).ok_or_else(|| {
                RebalanceError::UnknownStateModel {
                    resource: resource.name.clone(),
                    model: resource.state_model.clone(),
                }
            })?;
            model.validate()?;
            let target: usize = model
                .role_counts(resource.replicas)
                .iter()
                .map(|(_, count)| *count as usize)
                .sum();

            for partition in resource.partition_names() {
                let mut previous: BTreeMap<String, String> = BTreeMap::new();
                if let Some(states) = input.previous.partition(&resource.name, &partition) {
                    for (participant, state) in states {
                        if !input.participants.contains_key(participant) {
                            debug!(
                                partition = %partition,
                                participant = %participant,
                                "previous holder is not live"
                            );
                            continue;
                        }
                        if model.placed_states().any(|s| s == state.as_str()) {
                            previous.insert(participant.clone(), state.clone());
                        }
                    }
                }

                slots.push(PartitionSlot {
                    resource,
                    model,
                    demand: self.weights.partition_capacity(&resource.name, &partition),
                    partition,
                    target,
                    previous,
                    chosen: Vec::new(),
                    rejected: Vec::new(),
                });
            }
        }

        Ok(slots)
    }
}

fn assign_roles(slots: &[PartitionSlot<'_>]) -> Assignment {
    let mut assignment = Assignment::new();

    for slot in slots {
        assignment.ensure_partition(&slot.resource.name, &slot.partition);
        let mut unassigned: Vec<&String> = slot.chosen.iter().collect();

        for (role, count) in slot.model.role_counts(slot.resource.replicas) {
            for _ in 0..count {
                if unassigned.is_empty() {
                    break;
                }
                let next = unassigned
                    .iter()
                    .position(|p| slot.previous.get(*p) == Some(&role))
                    .unwrap_or(0);
                let participant = unassigned.remove(next);
                assignment.set_replica(&slot.resource.name, &slot.partition, participant, &role);
            }
        }
    }

    assignment
}
