use corral_core::state_model::{LEADER_STANDBY, ONLINE_OFFLINE};
use corral_core::{ReplicaId, StateModelDefinition};
use corral_statemachine::{DefinitionError, LogTransition, TransitionTable};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Edges shared by every leader/standby style model, including the
/// controller's own leadership replica.
pub(crate) const LEADER_STANDBY_EDGES: [(&str, &str); 6] = [
    ("OFFLINE", "STANDBY"),
    ("STANDBY", "LEADER"),
    ("LEADER", "STANDBY"),
    ("STANDBY", "OFFLINE"),
    ("OFFLINE", "DROPPED"),
    ("DROPPED", "OFFLINE"),
];

const ONLINE_OFFLINE_EDGES: [(&str, &str); 4] = [
    ("OFFLINE", "ONLINE"),
    ("ONLINE", "OFFLINE"),
    ("OFFLINE", "DROPPED"),
    ("DROPPED", "OFFLINE"),
];

/// A state model as hosted by a participant: the definition the rebalancer
/// places against, plus the edges the participant may walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StateModelSpec {
    #[serde(flatten)]
    pub(crate) definition: StateModelDefinition,
    pub(crate) transitions: Vec<TransitionSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TransitionSpec {
    pub(crate) from: String,
    pub(crate) to: String,
}

impl StateModelSpec {
    fn with_edges(definition: StateModelDefinition, edges: &[(&str, &str)]) -> Self {
        Self {
            definition,
            transitions: edges
                .iter()
                .map(|(from, to)| TransitionSpec {
                    from: from.to_string(),
                    to: to.to_string(),
                })
                .collect(),
        }
    }

    pub(crate) fn leader_standby() -> Self {
        Self::with_edges(StateModelDefinition::leader_standby(), &LEADER_STANDBY_EDGES)
    }

    pub(crate) fn online_offline() -> Self {
        Self::with_edges(StateModelDefinition::online_offline(), &ONLINE_OFFLINE_EDGES)
    }

    pub(crate) fn name(&self) -> &str {
        &self.definition.name
    }
}

/// Models every participant knows without configuration.
pub(crate) fn builtin_state_models() -> BTreeMap<String, StateModelSpec> {
    let mut models = BTreeMap::new();
    models.insert(LEADER_STANDBY.to_string(), StateModelSpec::leader_standby());
    models.insert(ONLINE_OFFLINE.to_string(), StateModelSpec::online_offline());
    models
}

/// Per-replica model of a hosted resource partition. Hosted resources have
/// no external side effects here, transitions are recorded in the log.
#[derive(Debug, Default)]
pub(crate) struct ReplicaModel;

fn log_reset<'a>(_model: &'a mut ReplicaModel, replica: &'a ReplicaId) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        info!(replica = %replica, "replica reset to its initial state");
    })
}

pub(crate) fn replica_transition_table(
    spec: &StateModelSpec,
) -> Result<TransitionTable<ReplicaModel>, DefinitionError> {
    let mut builder = TransitionTable::builder(&spec.definition);
    for edge in &spec.transitions {
        builder = builder.transition(&edge.from, &edge.to, LogTransition);
    }

    builder
        .recovery(&spec.definition.initial_state, LogTransition)
        .on_reset(log_reset)
        .build()
}
