//! # Corral Core
//!
//! Shared data model of the Corral cluster manager and the narrow facade over
//! the coordination service (exclusive locks, versioned reads, conditional
//! writes, prefix watches) that every other crate builds on.

pub mod coordination;
mod errors;
pub mod model;
pub mod state_model;

pub use errors::ModelError;
pub use model::{
    Assignment, Participant, PartitionStateMap, ReplicaId, ResourceDefinition, ResourceStateMap,
    DEFAULT_CAPACITY_KEY,
};
pub use state_model::{StateCount, StateModelDefinition, StateSpec, ERROR_STATE};
