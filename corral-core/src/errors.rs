use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid state model {model}: {reason}")]
    InvalidStateModel { model: String, reason: String },

    #[error("Unknown state model: {0}")]
    UnknownStateModel(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("State {state} is not legal for partition {partition} (model {model})")]
    IllegalState {
        partition: String,
        state: String,
        model: String,
    },

    #[error("Partition {partition} has {assigned} replicas, replication factor is {replicas}")]
    TooManyReplicas {
        partition: String,
        assigned: usize,
        replicas: u32,
    },
}
