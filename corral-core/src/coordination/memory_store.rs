use super::{
    errors::{CoordinationError, Result},
    store::{CoordinationService, LockHandle, Versioned},
    watch::{WatchEvent, WatchStream},
};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

// events a watcher may fall behind before it is told to resync
pub(super) const WATCH_BUFFER: usize = 1024;

/// MemoryCoordinator is an in-process implementation of the coordination facade.
/// Used for tests and for single-process (standalone) clusters.
#[derive(Debug, Clone)]
pub struct MemoryCoordinator {
    entries: Arc<DashMap<String, Versioned>>,
    locks: Arc<DashMap<String, LockHandle>>,
    next_token: Arc<AtomicU64>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        MemoryCoordinator {
            entries: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            next_token: Arc::new(AtomicU64::new(1)),
            events: broadcast::channel(WATCH_BUFFER).0,
        }
    }

    /// Drops a lock regardless of its owner, as the service does when the
    /// owning session expires.
    pub fn expire_lock(&self, name: &str) {
        if let Some((_, handle)) = self.locks.remove(name) {
            debug!(lock = %name, owner = %handle.owner, "lock expired");
        }
    }

    /// Current owner of a lock, if any.
    pub fn lock_owner(&self, name: &str) -> Option<String> {
        self.locks.get(name).map(|h| h.owner.clone())
    }

    fn notify_watchers(&self, event: WatchEvent) {
        // no receiver means nobody is watching
        let _ = self.events.send(event);
    }

    fn validate_path(path: &str) -> Result<()> {
        if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') {
            return Err(CoordinationError::InvalidArguments(format!(
                "path must be absolute and must not end with '/': {}",
                path
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationService for MemoryCoordinator {
    async fn acquire_exclusive_lock(&self, name: &str, owner: &str) -> Result<LockHandle> {
        match self.locks.entry(name.to_string()) {
            Entry::Occupied(held) => Err(CoordinationError::LockHeld {
                name: name.to_string(),
                owner: held.get().owner.clone(),
            }),
            Entry::Vacant(slot) => {
                let handle = LockHandle {
                    name: name.to_string(),
                    owner: owner.to_string(),
                    token: self.next_token.fetch_add(1, Ordering::SeqCst),
                };
                slot.insert(handle.clone());
                Ok(handle)
            }
        }
    }

    async fn release_lock(&self, handle: &LockHandle) -> Result<()> {
        // only the exact acquisition that is still current may free the lock
        self.locks
            .remove_if(&handle.name, |_, held| held.token == handle.token);
        Ok(())
    }

    async fn watched_read(&self, path: &str) -> Result<Versioned> {
        Self::validate_path(path)?;
        self.entries
            .get(path)
            .map(|v| v.value().clone())
            .ok_or_else(|| CoordinationError::NotFound(path.to_string()))
    }

    async fn conditional_write(
        &self,
        path: &str,
        expected: Option<i64>,
        value: Value,
    ) -> Result<i64> {
        Self::validate_path(path)?;

        // events are sent while the entry is held so they leave in version order
        match (self.entries.entry(path.to_string()), expected) {
            (Entry::Vacant(slot), None) => {
                let _held = slot.insert(Versioned {
                    value: value.clone(),
                    version: 1,
                });
                self.notify_watchers(WatchEvent::Put {
                    path: path.to_string(),
                    value,
                    version: 1,
                });
                Ok(1)
            }
            (Entry::Occupied(_), None) => Err(CoordinationError::KeyExists(path.to_string())),
            (Entry::Vacant(_), Some(_)) => Err(CoordinationError::NotFound(path.to_string())),
            (Entry::Occupied(mut current), Some(expected)) => {
                let actual = current.get().version;
                if actual != expected {
                    return Err(CoordinationError::VersionConflict {
                        path: path.to_string(),
                        expected,
                        actual,
                    });
                }
                let version = actual + 1;
                current.insert(Versioned {
                    value: value.clone(),
                    version,
                });
                self.notify_watchers(WatchEvent::Put {
                    path: path.to_string(),
                    value,
                    version,
                });
                Ok(version)
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        Self::validate_path(path)?;

        if let Entry::Occupied(current) = self.entries.entry(path.to_string()) {
            self.notify_watchers(WatchEvent::Delete {
                path: path.to_string(),
            });
            current.remove();
        }
        Ok(())
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        Self::validate_path(path)?;

        let prefix = format!("{}/", path);
        let children: BTreeSet<String> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let rest = entry.key().strip_prefix(&prefix)?;
                let child = rest.split('/').next().filter(|c| !c.is_empty())?;
                Some(format!("{}{}", prefix, child))
            })
            .collect();

        Ok(children.into_iter().collect())
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream> {
        Ok(WatchStream::subscribe(self.events.subscribe(), prefix))
    }
}
