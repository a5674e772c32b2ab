use corral_core::ModelError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RebalanceError>;

/// Invalid rebalance input. Constraint violations found while placing replicas
/// are not errors, they are reported as [`crate::RebalanceIssue`]s.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RebalanceError {
    #[error("Resource {resource} uses unknown state model {model}")]
    UnknownStateModel { resource: String, model: String },

    #[error("Resource {0} has a replication factor of zero")]
    ZeroReplicas(String),

    #[error(transparent)]
    InvalidModel(#[from] ModelError),

    #[error("Invalid rebalance configuration: {0}")]
    InvalidConfig(String),
}
