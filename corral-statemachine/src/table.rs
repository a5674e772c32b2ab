use async_trait::async_trait;
use corral_core::{ReplicaId, StateModelDefinition, ERROR_STATE};
use futures::future::BoxFuture;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::errors::{DefinitionError, HandlerError, TransitionError};

/// Current state of a replica: one of the model's declared states, or the
/// ERROR pseudostate entered after a failed transition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReplicaState {
    Declared(String),
    Error,
}

impl ReplicaState {
    pub fn declared(state: &str) -> Self {
        ReplicaState::Declared(state.to_string())
    }

    pub fn is(&self, state: &str) -> bool {
        matches!(self, ReplicaState::Declared(s) if s == state)
    }
}

impl fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaState::Declared(state) => f.write_str(state),
            ReplicaState::Error => f.write_str(ERROR_STATE),
        }
    }
}

/// What a handler gets to know about the transition it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionContext {
    pub replica: ReplicaId,
    pub from: String,
    pub to: String,
}

pub type HandlerFuture<'a> = BoxFuture<'a, Result<(), HandlerError>>;

/// Side effects bound to one (from, to) edge.
///
/// Implemented for plain functions of the shape
/// `fn(&mut M, &TransitionContext) -> HandlerFuture<'_>`.
#[async_trait]
pub trait TransitionHandler<M>: Send + Sync {
    async fn on_transition(
        &self,
        model: &mut M,
        ctx: &TransitionContext,
    ) -> Result<(), HandlerError>;
}

#[async_trait]
impl<M, F> TransitionHandler<M> for F
where
    M: Send + 'static,
    F: for<'a> Fn(&'a mut M, &'a TransitionContext) -> HandlerFuture<'a> + Send + Sync,
{
    async fn on_transition(
        &self,
        model: &mut M,
        ctx: &TransitionContext,
    ) -> Result<(), HandlerError> {
        (self)(model, ctx).await
    }
}

/// Runs after a handler failed, before the replica is put in ERROR.
#[async_trait]
pub trait RollbackHook<M>: Send + Sync {
    async fn rollback_on_error(
        &self,
        model: &mut M,
        ctx: &TransitionContext,
        error: &TransitionError,
    );
}

#[async_trait]
impl<M, F> RollbackHook<M> for F
where
    M: Send + 'static,
    F: for<'a> Fn(&'a mut M, &'a TransitionContext, &'a TransitionError) -> BoxFuture<'a, ()>
        + Send
        + Sync,
{
    async fn rollback_on_error(
        &self,
        model: &mut M,
        ctx: &TransitionContext,
        error: &TransitionError,
    ) {
        (self)(model, ctx, error).await
    }
}

/// Drives the replica's external resources to a quiescent condition. Must be
/// idempotent: the engine calls it on every `reset`.
#[async_trait]
pub trait ResetHook<M>: Send + Sync {
    async fn reset(&self, model: &mut M, replica: &ReplicaId);
}

#[async_trait]
impl<M, F> ResetHook<M> for F
where
    M: Send + 'static,
    F: for<'a> Fn(&'a mut M, &'a ReplicaId) -> BoxFuture<'a, ()> + Send + Sync,
{
    async fn reset(&self, model: &mut M, replica: &ReplicaId) {
        (self)(model, replica).await
    }
}

/// Handler that only records the transition in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransition;

#[async_trait]
impl<M: Send + 'static> TransitionHandler<M> for LogTransition {
    async fn on_transition(
        &self,
        _model: &mut M,
        ctx: &TransitionContext,
    ) -> Result<(), HandlerError> {
        info!(
            replica = %ctx.replica,
            from = %ctx.from,
            to = %ctx.to,
            "replica transition"
        );
        Ok(())
    }
}

/// Dispatch table of a state model: declared states, the initial state, one
/// handler per legal edge, and the rollback/reset hooks.
pub struct TransitionTable<M> {
    model_name: String,
    initial_state: String,
    states: BTreeSet<String>,
    edges: BTreeMap<(ReplicaState, String), Arc<dyn TransitionHandler<M>>>,
    rollback: Option<Arc<dyn RollbackHook<M>>>,
    reset: Option<Arc<dyn ResetHook<M>>>,
}

impl<M> fmt::Debug for TransitionTable<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionTable")
            .field("model_name", &self.model_name)
            .field("initial_state", &self.initial_state)
            .field("edges", &self.edges.keys().collect::<Vec<_>>())
            .field("has_rollback", &self.rollback.is_some())
            .field("has_reset", &self.reset.is_some())
            .finish()
    }
}

impl<M: Send + 'static> TransitionTable<M> {
    pub fn builder(definition: &StateModelDefinition) -> TransitionTableBuilder<M> {
        TransitionTableBuilder {
            definition: definition.clone(),
            edges: BTreeMap::new(),
            rollback: None,
            reset: None,
            errors: Vec::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn initial_state(&self) -> &str {
        &self.initial_state
    }

    pub fn is_declared(&self, state: &str) -> bool {
        self.states.contains(state)
    }

    pub fn has_edge(&self, from: &ReplicaState, to: &str) -> bool {
        self.edges.contains_key(&(from.clone(), to.to_string()))
    }

    pub(crate) fn handler(
        &self,
        from: &ReplicaState,
        to: &str,
    ) -> Option<Arc<dyn TransitionHandler<M>>> {
        self.edges.get(&(from.clone(), to.to_string())).cloned()
    }

    pub(crate) fn rollback_hook(&self) -> Option<Arc<dyn RollbackHook<M>>> {
        self.rollback.clone()
    }

    pub(crate) fn reset_hook(&self) -> Option<Arc<dyn ResetHook<M>>> {
        self.reset.clone()
    }

    /// Shortest sequence of states leading from `from` to `to` over declared
    /// edges, excluding `from`. Ties are broken by state name so the result
    /// is stable. `Some(vec![])` when already there, `None` when unreachable.
    pub fn path(&self, from: &ReplicaState, to: &str) -> Option<Vec<String>> {
        if from.is(to) {
            return Some(Vec::new());
        }

        let target = ReplicaState::declared(to);
        let mut previous: BTreeMap<ReplicaState, ReplicaState> = BTreeMap::new();
        let mut queue = VecDeque::from([from.clone()]);
        let mut visited = BTreeSet::from([from.clone()]);

        while let Some(current) = queue.pop_front() {
            if current == target {
                let mut path = Vec::new();
                let mut step = current;
                while &step != from {
                    path.push(step.to_string());
                    step = previous.get(&step)?.clone();
                }
                path.reverse();
                return Some(path);
            }

            // edges are keyed (from, to), so this range yields neighbours sorted by name
            for ((_, next), _) in self
                .edges
                .range((current.clone(), String::new())..)
                .take_while(|((edge_from, _), _)| *edge_from == current)
            {
                let next = ReplicaState::declared(next);
                if next != current && visited.insert(next.clone()) {
                    previous.insert(next.clone(), current.clone());
                    queue.push_back(next);
                }
            }
        }

        None
    }
}

pub struct TransitionTableBuilder<M> {
    definition: StateModelDefinition,
    edges: BTreeMap<(ReplicaState, String), Arc<dyn TransitionHandler<M>>>,
    rollback: Option<Arc<dyn RollbackHook<M>>>,
    reset: Option<Arc<dyn ResetHook<M>>>,
    errors: Vec<DefinitionError>,
}

impl<M: Send + 'static> TransitionTableBuilder<M> {
    /// Declares the edge `from -> to`. A self-loop is legal only when declared here.
    pub fn transition(
        mut self,
        from: &str,
        to: &str,
        handler: impl TransitionHandler<M> + 'static,
    ) -> Self {
        for state in [from, to] {
            if !self.definition.is_declared(state) {
                self.errors
                    .push(DefinitionError::UnknownState(state.to_string()));
            }
        }
        self.insert_edge(ReplicaState::declared(from), to, Arc::new(handler));
        self
    }

    /// Declares a recovery edge out of the ERROR pseudostate.
    pub fn recovery(mut self, to: &str, handler: impl TransitionHandler<M> + 'static) -> Self {
        if !self.definition.is_declared(to) {
            self.errors.push(DefinitionError::UnknownState(to.to_string()));
        }
        self.insert_edge(ReplicaState::Error, to, Arc::new(handler));
        self
    }

    pub fn on_rollback(mut self, hook: impl RollbackHook<M> + 'static) -> Self {
        self.rollback = Some(Arc::new(hook));
        self
    }

    pub fn on_reset(mut self, hook: impl ResetHook<M> + 'static) -> Self {
        self.reset = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<TransitionTable<M>, DefinitionError> {
        self.definition.validate()?;
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        Ok(TransitionTable {
            model_name: self.definition.name.clone(),
            initial_state: self.definition.initial_state.clone(),
            states: self
                .definition
                .states
                .iter()
                .map(|s| s.name.clone())
                .collect(),
            edges: self.edges,
            rollback: self.rollback,
            reset: self.reset,
        })
    }

    fn insert_edge(
        &mut self,
        from: ReplicaState,
        to: &str,
        handler: Arc<dyn TransitionHandler<M>>,
    ) {
        let key = (from, to.to_string());
        if self.edges.contains_key(&key) {
            self.errors.push(DefinitionError::DuplicateEdge {
                from: key.0.to_string(),
                to: key.1,
            });
            return;
        }
        self.edges.insert(key, handler);
    }
}
