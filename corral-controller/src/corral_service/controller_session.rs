use anyhow::{bail, Result};
use async_trait::async_trait;
use corral_core::coordination::LockHandle;
use corral_core::StateModelDefinition;
use corral_rebalance::RebalanceEngine;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::controller_loop::ControllerLoop;
use crate::resources::Resources;

/// Leadership held by this instance over one cluster.
#[async_trait]
pub(crate) trait ControllerSession: Send + Sync {
    fn cluster(&self) -> &str;

    /// Stops the control loop and gives up leadership. Calling it again is a no-op.
    async fn disconnect(&mut self);
}

#[async_trait]
pub(crate) trait ControllerSessionFactory: Send + Sync {
    /// Fails when another instance holds the cluster's leadership.
    async fn connect(&self, cluster: &str, instance: &str) -> Result<Box<dyn ControllerSession>>;
}

/// Sessions backed by the coordination service: leadership is the
/// `controller/leader` lock, the session runs the periodic controller loop.
pub(crate) struct CoordinatedSessionFactory {
    resources: Resources,
    engine: Arc<RebalanceEngine>,
    state_models: BTreeMap<String, StateModelDefinition>,
}

impl CoordinatedSessionFactory {
    pub(crate) fn new(
        resources: Resources,
        engine: Arc<RebalanceEngine>,
        state_models: BTreeMap<String, StateModelDefinition>,
    ) -> Self {
        Self {
            resources,
            engine,
            state_models,
        }
    }
}

#[async_trait]
impl ControllerSessionFactory for CoordinatedSessionFactory {
    async fn connect(&self, cluster: &str, instance: &str) -> Result<Box<dyn ControllerSession>> {
        if cluster != self.resources.cluster_name() {
            bail!(
                "controller session requested for cluster {}, this instance serves {}",
                cluster,
                self.resources.cluster_name()
            );
        }

        let lock = self
            .resources
            .store()
            .acquire_exclusive_lock(&self.resources.controller_leader_path(), instance)
            .await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let controller_loop = ControllerLoop::new(
            self.resources.clone(),
            Arc::clone(&self.engine),
            self.state_models.clone(),
        );
        let task = tokio::spawn(async move { controller_loop.run(shutdown_rx).await });

        info!(
            cluster = %cluster,
            instance = %instance,
            token = lock.token,
            "controller session established"
        );

        Ok(Box::new(CoordinatedSession {
            cluster: cluster.to_string(),
            resources: self.resources.clone(),
            lock: Some(lock),
            shutdown: shutdown_tx,
            task: Some(task),
        }))
    }
}

struct CoordinatedSession {
    cluster: String,
    resources: Resources,
    lock: Option<LockHandle>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl ControllerSession for CoordinatedSession {
    fn cluster(&self) -> &str {
        &self.cluster
    }

    async fn disconnect(&mut self) {
        let _ = self.shutdown.send(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(cluster = %self.cluster, error = %e, "controller loop task ended abnormally");
            }
        }

        if let Some(lock) = self.lock.take() {
            match self.resources.store().release_lock(&lock).await {
                Ok(()) => info!(cluster = %self.cluster, "controller session released"),
                Err(e) => {
                    warn!(cluster = %self.cluster, error = %e, "failed to release controller lock")
                }
            }
        }
    }
}

impl Drop for CoordinatedSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown.send(true);
            task.abort();
        }
    }
}
