//! # Corral State Machine
//!
//! Generic, table-driven replica state machine engine.
//!
//! A [`TransitionTable`] is built once per state model: it binds every legal
//! (from, to) edge to a handler and carries the `rollback_on_error` and
//! `reset` hooks. A [`StateMachineEngine`] runs the table for each local
//! replica:
//!
//! - undeclared edges fail with `IllegalTransition` and leave the replica untouched
//! - a failing (or panicking) handler triggers the rollback hook and puts the
//!   replica in the ERROR pseudostate until it is reset or recovered
//! - transitions on one replica are strictly serialized, replicas are independent

mod engine;
mod errors;
mod table;

pub use engine::{StateMachineEngine, TransitionRequest};
pub use errors::{DefinitionError, HandlerError, Result, TransitionError};
pub use table::{
    HandlerFuture, LogTransition, ReplicaState, ResetHook, RollbackHook, TransitionContext,
    TransitionHandler, TransitionTable, TransitionTableBuilder,
};

#[cfg(test)]
mod engine_test;
#[cfg(test)]
mod table_test;
