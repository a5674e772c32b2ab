use anyhow::Result;
use corral_core::coordination::{CoordinationError, WatchEvent};
use corral_core::{Assignment, ReplicaId};
use corral_statemachine::{DefinitionError, ReplicaState, StateMachineEngine, TransitionRequest};
use futures::future::join_all;
use futures::StreamExt;
use metrics::counter;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::replica_model::{replica_transition_table, ReplicaModel, StateModelSpec};
use crate::controller_metrics::{TRANSITIONS_TOTAL, TRANSITION_FAILURES_TOTAL};
use crate::resources::Resources;

/// Local replicas of one participant, one state machine engine per state model.
pub(crate) struct ParticipantRuntime {
    name: String,
    resources: Resources,
    engines: BTreeMap<String, StateMachineEngine<ReplicaModel>>,
}

impl std::fmt::Debug for ParticipantRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantRuntime")
            .field("name", &self.name)
            .field("state_models", &self.engines.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ParticipantRuntime {
    pub(crate) fn new(
        name: &str,
        resources: Resources,
        state_models: &BTreeMap<String, StateModelSpec>,
    ) -> Result<Self, DefinitionError> {
        let mut engines = BTreeMap::new();
        for (model, spec) in state_models {
            let table = replica_transition_table(spec)?;
            engines.insert(
                model.clone(),
                StateMachineEngine::new(table, |_replica: &ReplicaId| ReplicaModel),
            );
        }

        Ok(Self {
            name: name.to_string(),
            resources,
            engines,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Moves every local replica to the state `assignment` gives it, replicas
    /// no longer assigned here back to their initial state, then publishes the
    /// resulting current states. Replicas run concurrently.
    pub(crate) async fn reconcile(&self, assignment: &Assignment) -> Result<Assignment> {
        let definitions = self.resources.resource_definitions().await?;
        let desired = assignment.replicas_of(&self.name);

        let mut work = Vec::new();
        for (replica, state) in &desired {
            let Some(engine) = definitions
                .get(&replica.resource)
                .and_then(|definition| self.engines.get(&definition.state_model))
            else {
                warn!(replica = %replica, "no state model for assigned replica, skipping");
                continue;
            };
            work.push((engine, replica.clone(), state.clone(), false));
        }

        for engine in self.engines.values() {
            for replica in engine.snapshot().await.into_keys() {
                if !desired.contains_key(&replica) {
                    let initial = engine.table().initial_state().to_string();
                    work.push((engine, replica, initial, true));
                }
            }
        }

        join_all(work.into_iter().map(|(engine, replica, target, release)| async move {
            let state = drive_replica(engine, &replica, &target).await;
            if release && state.is(&target) {
                engine.forget(&replica);
                debug!(replica = %replica, "replica released");
            }
        }))
        .await;

        let states = self.current_states().await;
        self.resources
            .publish_current_states(&self.name, &states)
            .await?;
        Ok(states)
    }

    /// States of every tracked replica, ERROR included.
    pub(crate) async fn current_states(&self) -> Assignment {
        let mut states = Assignment::new();
        for engine in self.engines.values() {
            for (replica, state) in engine.snapshot().await {
                states.set_replica(
                    &replica.resource,
                    &replica.partition,
                    &replica.participant,
                    &state.to_string(),
                );
            }
        }
        states
    }

    async fn apply(&self, assignment: &Assignment) {
        match self.reconcile(assignment).await {
            Ok(states) => info!(
                participant = %self.name,
                replicas = states.replica_count(),
                "participant reconciled with the assignment"
            ),
            Err(e) => error!(participant = %self.name, error = %e, "reconcile failed"),
        }
    }

    async fn resync(&self) {
        match self.resources.read_assignment().await {
            Ok((assignment, _)) => self.apply(&assignment).await,
            Err(e) => error!(participant = %self.name, error = %e, "failed to read assignment"),
        }
    }

    /// Takes every local replica back to its initial state.
    pub(crate) async fn release_all(&self) {
        self.apply(&Assignment::new()).await;
    }
}

/// Walks `replica` over declared edges to `target`. A replica in ERROR is
/// reset first. Returns the state it ends up in.
async fn drive_replica(
    engine: &StateMachineEngine<ReplicaModel>,
    replica: &ReplicaId,
    target: &str,
) -> ReplicaState {
    let mut current = engine
        .current_state(replica)
        .await
        .unwrap_or_else(|| ReplicaState::declared(engine.table().initial_state()));

    if current == ReplicaState::Error {
        current = ReplicaState::declared(&engine.reset(replica).await);
    }

    let Some(path) = engine.table().path(&current, target) else {
        warn!(replica = %replica, from = %current, to = %target, "no path to the assigned state");
        return current;
    };

    for next in path {
        let request = TransitionRequest::new(replica.clone(), &current.to_string(), &next);
        match engine.apply(request).await {
            Ok(state) => {
                counter!(TRANSITIONS_TOTAL.name).increment(1);
                current = ReplicaState::declared(&state);
            }
            Err(e) => {
                counter!(TRANSITION_FAILURES_TOTAL.name).increment(1);
                warn!(replica = %replica, error = %e, "replica transition failed");
                return engine.current_state(replica).await.unwrap_or(current);
            }
        }
    }
    current
}

/// Keeps the participant's replicas in line with the published assignment
///
/// ## Process Flow:
/// 1. **Setup Watch**: subscribes to `/corral/{cluster}/assignment` first, so
///    no publish is missed between the initial read and the stream
/// 2. **Initial Sync**: reads and applies the current assignment
/// 3. **Events**: Put applies the new assignment, Delete releases everything,
///    a lagged stream triggers a full re-read
pub(crate) async fn watch_assignment(
    runtime: Arc<ParticipantRuntime>,
    mut shutdown: watch::Receiver<bool>,
) {
    let path = runtime.resources.assignment_path();
    let mut stream = match runtime.resources.store().watch(&path).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(
                participant = %runtime.name(),
                error = %e,
                "Failed to create assignment watch stream"
            );
            return;
        }
    };

    runtime.resync().await;

    loop {
        tokio::select! {
            event = stream.next() => match event {
                Some(Ok(WatchEvent::Put { value, version, .. })) => {
                    match serde_json::from_value::<Assignment>(value) {
                        Ok(assignment) => {
                            debug!(participant = %runtime.name(), version, "assignment changed");
                            runtime.apply(&assignment).await;
                        }
                        Err(e) => warn!(error = %e, "invalid assignment payload, ignoring"),
                    }
                }
                Some(Ok(WatchEvent::Delete { .. })) => {
                    runtime.release_all().await;
                }
                Some(Err(CoordinationError::WatchLagged { missed, .. })) => {
                    warn!(
                        participant = %runtime.name(),
                        missed,
                        "assignment watcher lagged, re-reading the assignment"
                    );
                    runtime.resync().await;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Error receiving watch event");
                }
                None => {
                    warn!(participant = %runtime.name(), "assignment watch stream closed");
                    break;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
