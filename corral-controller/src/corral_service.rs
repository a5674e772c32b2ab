mod assignment_watcher;
mod controller_loop;
mod controller_session;
mod leader_election;
mod participant_register;
mod replica_model;

pub(crate) use assignment_watcher::{watch_assignment, ParticipantRuntime};
pub(crate) use controller_session::CoordinatedSessionFactory;
pub(crate) use leader_election::LeaderElection;
pub(crate) use participant_register::{deregister_participant, register_participant};
pub(crate) use replica_model::{builtin_state_models, replica_transition_table, StateModelSpec};


use anyhow::{Context, Result};
use corral_core::coordination::CoordinationService;
use corral_core::{Participant, ResourceDefinition, StateModelDefinition};
use corral_rebalance::{ConfiguredWeightProvider, RebalanceEngine};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{resources::Resources, service_configuration::ServiceConfiguration};

// Corral Service hosts both halves of the control plane in one process.
//
// Controller:
// Every instance competes for the controller leadership of the cluster through
// its leadership replica (OFFLINE -> STANDBY -> LEADER). The leader holds the
// cluster lock and runs the controller loop, which computes the target
// assignment from the live participants and publishes it.
//
// Participants:
// Each configured participant registers itself as live, watches the published
// assignment and drives its local replicas to the assigned states, then
// reports what it reached under current_states.
pub(crate) struct CorralService {
    resources: Resources,
    leader_election: Arc<LeaderElection>,
    leader_check_interval: Duration,
    bootstrap_resources: Vec<ResourceDefinition>,
    participants: Vec<(Participant, Arc<ParticipantRuntime>)>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl CorralService {
    pub(crate) fn new(
        config: ServiceConfiguration,
        store: Arc<dyn CoordinationService>,
    ) -> Result<Self> {
        let resources = Resources::new(store, &config.cluster_name);

        let weights = Arc::new(ConfiguredWeightProvider::new(
            config.weights.clone(),
            &config.rebalance.capacity_key,
        ));
        let engine = Arc::new(RebalanceEngine::new(config.rebalance.clone(), weights));

        let definitions: BTreeMap<String, StateModelDefinition> = config
            .state_models
            .iter()
            .map(|(name, spec)| (name.clone(), spec.definition.clone()))
            .collect();
        let factory = Arc::new(CoordinatedSessionFactory::new(
            resources.clone(),
            engine,
            definitions,
        ));

        let leader_election = LeaderElection::new(
            factory,
            resources.controller_replica(&config.instance_name),
        )
        .context("Failed to build the leader election state model")?;

        let mut participants = Vec::new();
        for participant in config.participants {
            let runtime =
                ParticipantRuntime::new(&participant.name, resources.clone(), &config.state_models)
                    .with_context(|| {
                        format!("Failed to build replica engines for {}", participant.name)
                    })?;
            participants.push((participant, Arc::new(runtime)));
        }

        let (shutdown, _) = watch::channel(false);

        Ok(CorralService {
            resources,
            leader_election: Arc::new(leader_election),
            leader_check_interval: config.leader_check_interval,
            bootstrap_resources: config.bootstrap_resources,
            participants,
            shutdown,
            tasks: Vec::new(),
        })
    }

    pub(crate) async fn start(&mut self) -> Result<()> {
        info!(cluster = %self.resources.cluster_name(), "starting the Corral service");

        // Create the bootstrap resources if they are not yet known to the cluster
        for resource in &self.bootstrap_resources {
            if self.resources.create_resource(resource).await? {
                info!(
                    resource = %resource.name,
                    partitions = resource.num_partitions,
                    replicas = resource.replicas,
                    state_model = %resource.state_model,
                    "resource created"
                );
            }
        }

        // Register the local participants and start following the assignment
        for (participant, runtime) in &self.participants {
            register_participant(&self.resources, participant).await?;
            self.tasks.push(tokio::spawn(watch_assignment(
                Arc::clone(runtime),
                self.shutdown.subscribe(),
            )));
        }

        // Compete for the controller leadership
        let election = Arc::clone(&self.leader_election);
        let interval = self.leader_check_interval;
        let shutdown = self.shutdown.subscribe();
        self.tasks.push(tokio::spawn(async move {
            election.start(interval, shutdown).await
        }));

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn leader_election(&self) -> &LeaderElection {
        &self.leader_election
    }

    /// Stops the background tasks, resigns the leadership and takes the local
    /// participants out of the cluster.
    pub(crate) async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }

        if self.leader_election.is_leader().await {
            info!(cluster = %self.resources.cluster_name(), "resigning the controller leadership");
        }
        self.leader_election.resign().await;

        for (participant, runtime) in &self.participants {
            runtime.release_all().await;
            deregister_participant(&self.resources, &participant.name).await?;
        }

        info!(cluster = %self.resources.cluster_name(), "Corral service stopped");
        Ok(())
    }
}
