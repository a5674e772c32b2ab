use corral_core::ReplicaId;
use dashmap::DashMap;
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, TransitionError};
use crate::table::{ReplicaState, TransitionContext, TransitionTable};

/// Request to move one replica to `to`.
///
/// `from`, when set, is the state the requester believes the replica is in; a
/// mismatch is rejected as stale instead of being applied to a different state.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub replica: ReplicaId,
    pub from: Option<String>,
    pub to: String,
}

impl TransitionRequest {
    pub fn new(replica: ReplicaId, from: &str, to: &str) -> Self {
        Self {
            replica,
            from: Some(from.to_string()),
            to: to.to_string(),
        }
    }

    /// Request that applies to whatever the current state is.
    pub fn to(replica: ReplicaId, to: &str) -> Self {
        Self {
            replica,
            from: None,
            to: to.to_string(),
        }
    }
}

struct ReplicaSlot<M> {
    state: ReplicaState,
    model: M,
}

type ModelFactory<M> = dyn Fn(&ReplicaId) -> M + Send + Sync;

/// Runs a transition table for every local replica.
///
/// Each replica owns one model instance (created lazily by the factory) behind
/// its own fair mutex: transitions on the same replica queue up in arrival
/// order and never overlap, while different replicas proceed independently.
pub struct StateMachineEngine<M> {
    table: Arc<TransitionTable<M>>,
    factory: Arc<ModelFactory<M>>,
    replicas: Arc<DashMap<ReplicaId, Arc<Mutex<ReplicaSlot<M>>>>>,
}

impl<M> Clone for StateMachineEngine<M> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            factory: Arc::clone(&self.factory),
            replicas: Arc::clone(&self.replicas),
        }
    }
}

impl<M> std::fmt::Debug for StateMachineEngine<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachineEngine")
            .field("table", &self.table)
            .field("replicas", &self.replicas.len())
            .finish()
    }
}

impl<M: Send + 'static> StateMachineEngine<M> {
    pub fn new<F>(table: TransitionTable<M>, factory: F) -> Self
    where
        F: Fn(&ReplicaId) -> M + Send + Sync + 'static,
    {
        Self {
            table: Arc::new(table),
            factory: Arc::new(factory),
            replicas: Arc::new(DashMap::new()),
        }
    }

    pub fn table(&self) -> &TransitionTable<M> {
        &self.table
    }

    fn slot(&self, replica: &ReplicaId) -> Arc<Mutex<ReplicaSlot<M>>> {
        self.replicas
            .entry(replica.clone())
            .or_insert_with(|| {
                debug!(replica = %replica, "creating replica state model");
                Arc::new(Mutex::new(ReplicaSlot {
                    state: ReplicaState::declared(self.table.initial_state()),
                    model: (self.factory)(replica),
                }))
            })
            .clone()
    }

    /// Executes one transition and returns the new current state.
    pub async fn apply(&self, request: TransitionRequest) -> Result<String> {
        let slot = self.slot(&request.replica);
        let mut guard = slot.lock().await;
        let ReplicaSlot { state, model } = &mut *guard;

        if let Some(expected) = &request.from {
            if !state.is(expected) {
                warn!(
                    replica = %request.replica,
                    expected = %expected,
                    current = %state,
                    "stale transition request"
                );
                return Err(TransitionError::StaleRequest {
                    replica: request.replica,
                    expected: expected.clone(),
                    current: state.clone(),
                });
            }
        }

        let Some(handler) = self.table.handler(state, &request.to) else {
            warn!(
                replica = %request.replica,
                from = %state,
                to = %request.to,
                "illegal transition"
            );
            return Err(TransitionError::IllegalTransition {
                replica: request.replica,
                from: state.clone(),
                to: request.to,
            });
        };

        let ctx = TransitionContext {
            replica: request.replica,
            from: state.to_string(),
            to: request.to,
        };
        debug!(replica = %ctx.replica, from = %ctx.from, to = %ctx.to, "running transition handler");

        let reason = match AssertUnwindSafe(handler.on_transition(model, &ctx))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                *state = ReplicaState::declared(&ctx.to);
                info!(replica = %ctx.replica, from = %ctx.from, to = %ctx.to, "transition completed");
                return Ok(ctx.to);
            }
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
        };

        let failure = TransitionError::HandlerFailure {
            replica: ctx.replica.clone(),
            from: ctx.from.clone(),
            to: ctx.to.clone(),
            reason,
        };
        error!(replica = %ctx.replica, error = %failure, "transition failed, rolling back");

        if let Some(rollback) = self.table.rollback_hook() {
            if let Err(panic) = AssertUnwindSafe(rollback.rollback_on_error(model, &ctx, &failure))
                .catch_unwind()
                .await
            {
                error!(
                    replica = %ctx.replica,
                    panic = %panic_message(panic.as_ref()),
                    "rollback hook panicked"
                );
            }
        }

        *state = ReplicaState::Error;
        Err(failure)
    }

    /// Releases the replica's external resources and forces it back to the
    /// initial state, whatever state (ERROR included) it is in. Idempotent.
    pub async fn reset(&self, replica: &ReplicaId) -> String {
        let initial = self.table.initial_state().to_string();

        let Some(slot) = self.replicas.get(replica).map(|s| Arc::clone(s.value())) else {
            return initial;
        };
        let mut guard = slot.lock().await;
        let ReplicaSlot { state, model } = &mut *guard;

        if let Some(hook) = self.table.reset_hook() {
            if let Err(panic) = AssertUnwindSafe(hook.reset(model, replica))
                .catch_unwind()
                .await
            {
                error!(
                    replica = %replica,
                    panic = %panic_message(panic.as_ref()),
                    "reset hook panicked"
                );
            }
        }

        if !state.is(&initial) {
            info!(replica = %replica, from = %state, to = %initial, "replica reset");
            *state = ReplicaState::declared(&initial);
        }
        initial
    }

    /// Current state, waiting for an in-flight transition to finish first.
    pub async fn current_state(&self, replica: &ReplicaId) -> Option<ReplicaState> {
        let slot = self.replicas.get(replica).map(|s| Arc::clone(s.value()))?;
        let state = slot.lock().await.state.clone();
        Some(state)
    }

    pub async fn snapshot(&self) -> BTreeMap<ReplicaId, ReplicaState> {
        let slots: Vec<(ReplicaId, Arc<Mutex<ReplicaSlot<M>>>)> = self
            .replicas
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut states = BTreeMap::new();
        for (replica, slot) in slots {
            states.insert(replica, slot.lock().await.state.clone());
        }
        states
    }

    /// Drops the replica's model. The next request for it starts from the initial state.
    pub fn forget(&self, replica: &ReplicaId) -> bool {
        self.replicas.remove(replica).is_some()
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
