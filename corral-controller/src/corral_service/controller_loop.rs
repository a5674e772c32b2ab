use anyhow::Result;
use corral_core::coordination::CoordinationError;
use corral_core::StateModelDefinition;
use corral_rebalance::{RebalanceEngine, RebalanceInput};
use futures::StreamExt;
use metrics::{counter, gauge, histogram};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::controller_metrics::{
    ASSIGNMENT_DIVERGENCE, CAPACITY_EXCEEDED_TOTAL, REBALANCE_DURATION_SECONDS,
    REBALANCE_PASSES_TOTAL, REBALANCE_REJECTED_TOTAL, UNDER_REPLICATED_TOTAL,
};
use crate::resources::Resources;

/// What a controller pass did with the computed assignment.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PassOutcome {
    Published { version: i64, divergence: f64 },
    /// The candidate equals the published assignment.
    Unchanged,
    /// The candidate diverged more than the configured maximum.
    Rejected { divergence: f64 },
    /// The assignment was replaced while the pass was computing.
    Conflict,
}

/// Periodic "read, compute, publish" pass run by the leading controller.
pub(crate) struct ControllerLoop {
    resources: Resources,
    engine: Arc<RebalanceEngine>,
    state_models: BTreeMap<String, StateModelDefinition>,
}

impl ControllerLoop {
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

    /// One pass. Inputs are read once up front; the publish is conditional
    /// on the assignment version read with them.
    pub(crate) async fn run_pass(&self) -> Result<PassOutcome> {
        let started = Instant::now();

        let participants = self.resources.live_participants().await?;
        let resources = self.resources.resource_definitions().await?;
        let (previous, version) = self.resources.read_assignment().await?;

        let input = RebalanceInput {
            participants,
            resources,
            state_models: self.state_models.clone(),
            previous,
        };
        let outcome = self.engine.compute(&input)?;

        histogram!(REBALANCE_DURATION_SECONDS.name).record(started.elapsed().as_secs_f64());
        counter!(REBALANCE_PASSES_TOTAL.name).increment(1);
        gauge!(ASSIGNMENT_DIVERGENCE.name).set(outcome.divergence);

        if !outcome.issues.is_empty() {
            warn!(
                cluster = %self.resources.cluster_name(),
                capacity_exceeded = outcome.capacity_exceeded(),
                under_replicated = outcome.under_replicated(),
                "assignment computed with unsatisfied constraints"
            );
        }
        counter!(CAPACITY_EXCEEDED_TOTAL.name).increment(outcome.capacity_exceeded() as u64);
        counter!(UNDER_REPLICATED_TOTAL.name).increment(outcome.under_replicated() as u64);

        if !input.previous.is_empty() && !self.engine.config().accepts(outcome.divergence) {
            counter!(REBALANCE_REJECTED_TOTAL.name).increment(1);
            warn!(
                divergence = outcome.divergence,
                max_divergence = self.engine.config().max_divergence,
                "candidate assignment rejected"
            );
            return Ok(PassOutcome::Rejected {
                divergence: outcome.divergence,
            });
        }

        if outcome.assignment == input.previous {
            debug!("assignment unchanged");
            return Ok(PassOutcome::Unchanged);
        }

        match self
            .resources
            .write_assignment(&outcome.assignment, version)
            .await
        {
            Ok(version) => {
                info!(
                    version,
                    divergence = outcome.divergence,
                    replicas = outcome.assignment.replica_count(),
                    "assignment published"
                );
                Ok(PassOutcome::Published {
                    version,
                    divergence: outcome.divergence,
                })
            }
            Err(CoordinationError::VersionConflict { .. }) | Err(CoordinationError::KeyExists(_)) => {
                warn!("assignment changed during the pass, retrying on the next one");
                Ok(PassOutcome::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs a pass on every tick and on every participant or resource change,
    /// until `shutdown` flips to true or its sender goes away.
    pub(crate) async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let store = self.resources.store();
        let mut changes = match (
            store.watch(&self.resources.participants_path()).await,
            store.watch(&self.resources.resources_path()).await,
        ) {
            (Ok(participants), Ok(resources)) => {
                Some(futures::stream::select(participants, resources))
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "cannot watch cluster membership, relying on the interval only");
                None
            }
        };

        let mut ticker = tokio::time::interval(self.engine.config().check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(cluster = %self.resources.cluster_name(), "controller loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                Some(event) = next_change(&mut changes) => {
                    match event {
                        Ok(event) => debug!(event = %event, "cluster membership changed"),
                        Err(e) => warn!(error = %e, "membership watch error"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if !self.engine.config().enabled {
                continue;
            }

            if let Err(e) = self.run_pass().await {
                error!(error = %e, "controller pass failed");
            }
        }

        info!(cluster = %self.resources.cluster_name(), "controller loop stopped");
    }
}

async fn next_change<S>(changes: &mut Option<S>) -> Option<S::Item>
where
    S: futures::Stream + Unpin,
{
    match changes {
        Some(stream) => stream.next().await,
        None => futures::future::pending().await,
    }
}
