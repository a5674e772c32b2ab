use corral_core::{ReplicaId, StateModelDefinition};
use corral_statemachine::{
    DefinitionError, HandlerError, HandlerFuture, LogTransition, ReplicaState, StateMachineEngine,
    TransitionContext, TransitionError, TransitionRequest, TransitionTable,
};
use futures::future::BoxFuture;
use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::controller_session::{ControllerSession, ControllerSessionFactory};
use crate::controller_metrics::{
    CONTROLLER_LEADER_STATE, TRANSITIONS_TOTAL, TRANSITION_FAILURES_TOTAL,
};

const LEADER: &str = "LEADER";
const OFFLINE: &str = "OFFLINE";

/// Per-instance model of the controller's leadership replica. It is the only
/// owner of the controller session; nothing outside the transition handlers
/// and the rollback/reset hooks touches it.
pub(crate) struct ControllerModel {
    factory: Arc<dyn ControllerSessionFactory>,
    session: Option<Box<dyn ControllerSession>>,
}

impl ControllerModel {
    pub(crate) fn new(factory: Arc<dyn ControllerSessionFactory>) -> Self {
        Self {
            factory,
            session: None,
        }
    }

    /// Model that already holds `session`, as left behind by a lost release.
    #[cfg(test)]
    pub(crate) fn with_session(
        factory: Arc<dyn ControllerSessionFactory>,
        session: Box<dyn ControllerSession>,
    ) -> Self {
        Self {
            factory,
            session: Some(session),
        }
    }

    async fn become_leader(&mut self, ctx: &TransitionContext) -> Result<(), HandlerError> {
        if let Some(session) = &self.session {
            // exclusivity is the lock's job, a second session is never opened
            error!(
                replica = %ctx.replica,
                cluster = %session.cluster(),
                "duplicate acquisition: controller session already held, keeping it"
            );
            return Ok(());
        }

        // the partition of a controller replica is the cluster it leads
        let session = self
            .factory
            .connect(&ctx.replica.partition, &ctx.replica.participant)
            .await?;
        self.session = Some(session);
        gauge!(CONTROLLER_LEADER_STATE.name).set(1.0);
        Ok(())
    }

    async fn become_standby(&mut self, ctx: &TransitionContext) -> Result<(), HandlerError> {
        match self.session.take() {
            Some(mut session) => {
                session.disconnect().await;
                gauge!(CONTROLLER_LEADER_STATE.name).set(0.0);
            }
            None => {
                error!(replica = %ctx.replica, "nothing to release: no controller session held");
            }
        }
        Ok(())
    }

    async fn release(&mut self, replica: &ReplicaId) {
        if let Some(mut session) = self.session.take() {
            session.disconnect().await;
            info!(replica = %replica, "controller session terminated");
        }
        gauge!(CONTROLLER_LEADER_STATE.name).set(0.0);
    }
}

fn on_become_leader<'a>(
    model: &'a mut ControllerModel,
    ctx: &'a TransitionContext,
) -> HandlerFuture<'a> {
    Box::pin(model.become_leader(ctx))
}

fn on_become_standby<'a>(
    model: &'a mut ControllerModel,
    ctx: &'a TransitionContext,
) -> HandlerFuture<'a> {
    Box::pin(model.become_standby(ctx))
}

fn on_rollback<'a>(
    model: &'a mut ControllerModel,
    ctx: &'a TransitionContext,
    _error: &'a TransitionError,
) -> BoxFuture<'a, ()> {
    Box::pin(model.release(&ctx.replica))
}

fn on_reset<'a>(model: &'a mut ControllerModel, replica: &'a ReplicaId) -> BoxFuture<'a, ()> {
    Box::pin(model.release(replica))
}

/// LeaderStandby table of the controller replica. Only STANDBY <-> LEADER
/// has side effects.
pub(crate) fn controller_transition_table(
) -> Result<TransitionTable<ControllerModel>, DefinitionError> {
    TransitionTable::builder(&StateModelDefinition::leader_standby())
        .transition("OFFLINE", "STANDBY", LogTransition)
        .transition("STANDBY", "LEADER", on_become_leader)
        .transition("LEADER", "STANDBY", on_become_standby)
        .transition("STANDBY", "OFFLINE", LogTransition)
        .transition("OFFLINE", "DROPPED", LogTransition)
        .transition("DROPPED", "OFFLINE", LogTransition)
        .recovery(OFFLINE, LogTransition)
        .on_rollback(on_rollback)
        .on_reset(on_reset)
        .build()
}

/// Drives this instance's controller replica towards LEADER.
///
/// ## Process Flow:
/// - every check walks OFFLINE -> STANDBY -> LEADER over the declared edges
/// - acquiring leadership fails while another instance holds the lock; the
///   replica lands in ERROR and is reset, the next check tries again
/// - resigning walks back to OFFLINE, which releases the session
pub(crate) struct LeaderElection {
    engine: StateMachineEngine<ControllerModel>,
    replica: ReplicaId,
}

impl std::fmt::Debug for LeaderElection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElection")
            .field("replica", &self.replica)
            .finish()
    }
}

impl LeaderElection {
    pub(crate) fn new(
        factory: Arc<dyn ControllerSessionFactory>,
        replica: ReplicaId,
    ) -> Result<Self, DefinitionError> {
        let table = controller_transition_table()?;
        let engine = StateMachineEngine::new(table, move |_replica: &ReplicaId| {
            ControllerModel::new(Arc::clone(&factory))
        });
        Ok(Self { engine, replica })
    }

    #[cfg(test)]
    pub(crate) fn with_engine(
        engine: StateMachineEngine<ControllerModel>,
        replica: ReplicaId,
    ) -> Self {
        Self { engine, replica }
    }

    pub(crate) async fn get_state(&self) -> ReplicaState {
        self.engine
            .current_state(&self.replica)
            .await
            .unwrap_or_else(|| ReplicaState::declared(self.engine.table().initial_state()))
    }

    pub(crate) async fn is_leader(&self) -> bool {
        self.get_state().await.is(LEADER)
    }

    /// One election attempt. Returns the state the replica ends up in.
    pub(crate) async fn check_leader(&self) -> ReplicaState {
        let current = self.get_state().await;

        if current == ReplicaState::Error {
            let state = self.engine.reset(&self.replica).await;
            debug!(replica = %self.replica, state = %state, "leader election replica reset after failure");
            return ReplicaState::declared(&state);
        }

        if current.is(LEADER) {
            gauge!(CONTROLLER_LEADER_STATE.name).set(1.0);
            return current;
        }

        self.walk(current, LEADER).await
    }

    /// Gives up leadership and takes the replica OFFLINE.
    pub(crate) async fn resign(&self) -> ReplicaState {
        let current = self.get_state().await;
        let state = if current == ReplicaState::Error {
            ReplicaState::declared(&self.engine.reset(&self.replica).await)
        } else {
            self.walk(current, OFFLINE).await
        };
        gauge!(CONTROLLER_LEADER_STATE.name).set(0.0);
        info!(replica = %self.replica, state = %state, "leadership resigned");
        state
    }

    async fn walk(&self, mut current: ReplicaState, target: &str) -> ReplicaState {
        let Some(path) = self.engine.table().path(&current, target) else {
            warn!(replica = %self.replica, from = %current, to = %target, "no path to target state");
            return current;
        };

        for next in path {
            let request = TransitionRequest::new(self.replica.clone(), &current.to_string(), &next);
            match self.engine.apply(request).await {
                Ok(state) => {
                    counter!(TRANSITIONS_TOTAL.name).increment(1);
                    current = ReplicaState::declared(&state);
                }
                Err(e) => {
                    counter!(TRANSITION_FAILURES_TOTAL.name).increment(1);
                    warn!(replica = %self.replica, error = %e, "leader election transition failed");
                    return self.get_state().await;
                }
            }
        }
        current
    }

    /// Runs an election attempt every `interval` until `shutdown` flips to true.
    pub(crate) async fn start(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_leader().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
