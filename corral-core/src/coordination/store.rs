use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::Result;
use super::watch::WatchStream;

/// A value read from the coordination service together with its version.
///
/// Versions start at 1 on creation and grow by one on every successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned {
    pub value: Value,
    pub version: i64,
}

/// Proof of ownership of an exclusive lock.
///
/// The handle carries a fencing token that is unique for every acquisition of
/// the same lock name, so releasing a stale handle never frees a newer holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub name: String,
    pub owner: String,
    pub token: u64,
}

/// Narrow facade over the strongly-consistent coordination service.
///
/// Only these primitives are consumed by the controller and the participants:
/// an exclusive lock, versioned reads, conditional writes and prefix watches.
#[async_trait]
pub trait CoordinationService: Send + Sync + 'static {
    async fn acquire_exclusive_lock(&self, name: &str, owner: &str) -> Result<LockHandle>;

    /// Releasing a handle that no longer owns the lock is a no-op.
    async fn release_lock(&self, handle: &LockHandle) -> Result<()>;

    async fn watched_read(&self, path: &str) -> Result<Versioned>;

    /// `expected == None` creates the path and fails with `KeyExists` if it is
    /// already present; `Some(v)` replaces the value only if the stored version is `v`.
    async fn conditional_write(
        &self,
        path: &str,
        expected: Option<i64>,
        value: Value,
    ) -> Result<i64>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Full paths of the direct children of `path`, sorted.
    async fn get_children(&self, path: &str) -> Result<Vec<String>>;

    async fn watch(&self, prefix: &str) -> Result<WatchStream>;
}

pub fn join_path(parts: &[&str]) -> String {
    let mut path = String::new();
    for part in parts {
        let trimmed = part.trim_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        path.push('/');
        path.push_str(trimmed);
    }
    path
}
