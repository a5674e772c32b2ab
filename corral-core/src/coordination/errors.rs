use serde_json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinationError>;

#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("Lock {name} is already held by {owner}")]
    LockHeld { name: String, owner: String },

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Version conflict on {path}: expected {expected}, found {actual}")]
    VersionConflict {
        path: String,
        expected: i64,
        actual: i64,
    },

    #[error("Key already exists: {0}")]
    KeyExists(String),

    #[error("Watch stream error: {0}")]
    WatchError(String),

    #[error("Watcher on {prefix} lagged, {missed} events missed")]
    WatchLagged { prefix: String, missed: u64 },

    #[error("Watch channel closed")]
    WatchChannelClosed,

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}
