use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;

use crate::errors::ModelError;

/// Pseudostate entered by a replica whose transition handler failed.
/// Reserved: no state model may declare it.
pub const ERROR_STATE: &str = "ERROR";

pub const LEADER_STANDBY: &str = "LeaderStandby";
pub const ONLINE_OFFLINE: &str = "OnlineOffline";

/// How many replicas of a partition must be in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawStateCount")]
pub enum StateCount {
    Exact(u32),
    /// Replication factor minus the sum of the exact counts.
    Remaining,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStateCount {
    Number(u32),
    Symbol(String),
}

impl TryFrom<RawStateCount> for StateCount {
    type Error = String;

    fn try_from(raw: RawStateCount) -> Result<Self, Self::Error> {
        match raw {
            RawStateCount::Number(n) => Ok(StateCount::Exact(n)),
            RawStateCount::Symbol(s) if s == "R" => Ok(StateCount::Remaining),
            RawStateCount::Symbol(s) => s
                .parse::<u32>()
                .map(StateCount::Exact)
                .map_err(|_| format!("invalid state count '{}', expected a number or 'R'", s)),
        }
    }
}

impl Serialize for StateCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StateCount::Exact(n) => serializer.serialize_u32(*n),
            StateCount::Remaining => serializer.serialize_str("R"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSpec {
    pub name: String,
    /// `None` for states the rebalancer never places (OFFLINE, DROPPED, ...).
    #[serde(default)]
    pub count: Option<StateCount>,
}

impl StateSpec {
    pub fn placed(name: &str, count: StateCount) -> Self {
        Self {
            name: name.to_string(),
            count: Some(count),
        }
    }

    pub fn unplaced(name: &str) -> Self {
        Self {
            name: name.to_string(),
            count: None,
        }
    }
}

/// Declared states of a class of replicas, in priority order (highest first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateModelDefinition {
    pub name: String,
    pub initial_state: String,
    pub states: Vec<StateSpec>,
}

impl StateModelDefinition {
    /// LEADER:1, STANDBY:R, OFFLINE, DROPPED. Initial state OFFLINE.
    pub fn leader_standby() -> Self {
        Self {
            name: LEADER_STANDBY.to_string(),
            initial_state: "OFFLINE".to_string(),
            states: vec![
                StateSpec::placed("LEADER", StateCount::Exact(1)),
                StateSpec::placed("STANDBY", StateCount::Remaining),
                StateSpec::unplaced("OFFLINE"),
                StateSpec::unplaced("DROPPED"),
            ],
        }
    }

    /// ONLINE:R, OFFLINE, DROPPED. Initial state OFFLINE.
    pub fn online_offline() -> Self {
        Self {
            name: ONLINE_OFFLINE.to_string(),
            initial_state: "OFFLINE".to_string(),
            states: vec![
                StateSpec::placed("ONLINE", StateCount::Remaining),
                StateSpec::unplaced("OFFLINE"),
                StateSpec::unplaced("DROPPED"),
            ],
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |reason: &str| ModelError::InvalidStateModel {
            model: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.states.is_empty() {
            return Err(invalid("no states declared"));
        }

        let mut seen = BTreeSet::new();
        for spec in &self.states {
            if spec.name.is_empty() {
                return Err(invalid("empty state name"));
            }
            if spec.name == ERROR_STATE {
                return Err(invalid("ERROR is a reserved pseudostate"));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(invalid(&format!("duplicate state {}", spec.name)));
            }
        }

        if !self.is_declared(&self.initial_state) {
            return Err(invalid(&format!(
                "initial state {} is not declared",
                self.initial_state
            )));
        }

        let remaining = self
            .states
            .iter()
            .filter(|s| s.count == Some(StateCount::Remaining))
            .count();
        if remaining > 1 {
            return Err(invalid("more than one state uses the remaining count"));
        }

        Ok(())
    }

    pub fn is_declared(&self, state: &str) -> bool {
        self.states.iter().any(|s| s.name == state)
    }

    /// Position of `state` in the priority order, lower is higher priority.
    pub fn priority(&self, state: &str) -> Option<usize> {
        self.states.iter().position(|s| s.name == state)
    }

    /// Expands the placed states into per-state replica counts for a replication
    /// factor, in priority order. Exact counts are served first and are capped by
    /// what is left of the replication factor.
    pub fn role_counts(&self, replicas: u32) -> Vec<(String, u32)> {
        let mut left = replicas;
        let mut counts: Vec<(String, u32)> = Vec::new();
        let mut remaining_slot = None;

        for spec in &self.states {
            match spec.count {
                Some(StateCount::Exact(n)) => {
                    let take = n.min(left);
                    left -= take;
                    counts.push((spec.name.clone(), take));
                }
                Some(StateCount::Remaining) => {
                    remaining_slot = Some(counts.len());
                    counts.push((spec.name.clone(), 0));
                }
                None => {}
            }
        }

        if let Some(idx) = remaining_slot {
            counts[idx].1 = left;
        }

        counts
    }

    /// States the rebalancer may assign.
    pub fn placed_states(&self) -> impl Iterator<Item = &str> {
        self.states
            .iter()
            .filter(|s| s.count.is_some())
            .map(|s| s.name.as_str())
    }
}
