use corral_core::{ModelError, ReplicaId};
use thiserror::Error;

use crate::table::ReplicaState;

/// Error type returned by transition handlers. Any error converts into it with `?`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, TransitionError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    /// No edge declared for (current, requested); the replica is untouched.
    #[error("Illegal transition for {replica}: {from} -> {to}")]
    IllegalTransition {
        replica: ReplicaId,
        from: ReplicaState,
        to: String,
    },

    /// The request was computed against a state the replica is no longer in.
    #[error("Stale transition request for {replica}: expected {expected}, current {current}")]
    StaleRequest {
        replica: ReplicaId,
        expected: String,
        current: ReplicaState,
    },

    /// The handler failed; rollback ran and the replica is now in ERROR.
    #[error("Transition {from} -> {to} failed for {replica}: {reason}")]
    HandlerFailure {
        replica: ReplicaId,
        from: String,
        to: String,
        reason: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error(transparent)]
    InvalidModel(#[from] ModelError),

    #[error("State {0} is not declared by the state model")]
    UnknownState(String),

    #[error("Transition {from} -> {to} is declared twice")]
    DuplicateEdge { from: String, to: String },
}
