use crate::corral_service::{builtin_state_models, replica_transition_table, StateModelSpec};

use anyhow::{bail, Context, Result};
use corral_core::{Participant, ResourceDefinition};
use corral_rebalance::{RebalanceConfig, WeightConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

/// configuration settings loaded from the config file
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LoadConfiguration {
    /// Corral cluster name
    pub(crate) cluster_name: String,
    /// Controller instance configuration
    pub(crate) controller: ControllerConfig,
    /// Rebalance policy applied by the leading controller
    #[serde(default)]
    pub(crate) rebalance: RebalanceConfig,
    /// State models in addition to the built-in LeaderStandby and OnlineOffline
    #[serde(default)]
    pub(crate) state_models: Vec<StateModelSpec>,
    /// Resources to be created on boot
    #[serde(default)]
    pub(crate) bootstrap_resources: Vec<ResourceDefinition>,
    /// Participants hosted by this process
    #[serde(default)]
    pub(crate) participants: Vec<Participant>,
    /// Partition weights known ahead of time
    #[serde(default)]
    pub(crate) weights: WeightConfig,
    /// Prometheus exporter, disabled when absent
    #[serde(default)]
    pub(crate) metrics: Option<MetricsConfig>,
}

/// Controller instance configuration
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ControllerConfig {
    /// Name this instance competes for leadership with
    pub(crate) instance_name: String,
    /// How often the instance tries to become the leader
    #[serde(default = "default_leader_check_interval_ms")]
    pub(crate) leader_check_interval_ms: u64,
}

fn default_leader_check_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MetricsConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
}

/// configuration settings for the Corral controller service
#[derive(Debug)]
pub(crate) struct ServiceConfiguration {
    /// Corral cluster name
    pub(crate) cluster_name: String,
    /// Name of this controller instance
    pub(crate) instance_name: String,
    pub(crate) leader_check_interval: Duration,
    pub(crate) rebalance: RebalanceConfig,
    /// Built-in and configured state models by name
    pub(crate) state_models: BTreeMap<String, StateModelSpec>,
    pub(crate) bootstrap_resources: Vec<ResourceDefinition>,
    pub(crate) participants: Vec<Participant>,
    pub(crate) weights: WeightConfig,
    /// Prometheus exporter address
    pub(crate) prom_exporter: Option<SocketAddr>,
}

impl TryFrom<LoadConfiguration> for ServiceConfiguration {
    type Error = anyhow::Error;

    fn try_from(config: LoadConfiguration) -> Result<Self> {
        if config.cluster_name.is_empty() || config.cluster_name.contains('/') {
            bail!(
                "Invalid cluster_name '{}': must be non-empty and contain no '/'",
                config.cluster_name
            );
        }
        if config.controller.instance_name.is_empty() {
            bail!("controller.instance_name must not be empty");
        }
        if config.controller.leader_check_interval_ms == 0 {
            bail!("controller.leader_check_interval_ms must be greater than zero");
        }

        config
            .rebalance
            .validate()
            .context("Invalid rebalance configuration")?;

        let mut state_models = builtin_state_models();
        for spec in config.state_models {
            state_models.insert(spec.name().to_string(), spec);
        }
        for spec in state_models.values() {
            replica_transition_table(spec)
                .with_context(|| format!("Invalid state model {}", spec.name()))?;
        }

        for resource in &config.bootstrap_resources {
            if !state_models.contains_key(&resource.state_model) {
                bail!(
                    "Resource {} references unknown state model {}",
                    resource.name,
                    resource.state_model
                );
            }
            if resource.replicas == 0 {
                bail!("Resource {} must have at least one replica", resource.name);
            }
        }

        for participant in &config.participants {
            if participant.name.is_empty() || participant.name.contains('/') {
                bail!("Invalid participant name '{}'", participant.name);
            }
        }

        // Construct prom_exporter from metrics.host and metrics.port if provided
        let prom_exporter: Option<SocketAddr> = match &config.metrics {
            Some(metrics) => Some(
                format!("{}:{}", metrics.host, metrics.port)
                    .parse()
                    .context("Failed to create prom_exporter")?,
            ),
            None => None,
        };

        Ok(ServiceConfiguration {
            cluster_name: config.cluster_name,
            instance_name: config.controller.instance_name,
            leader_check_interval: Duration::from_millis(
                config.controller.leader_check_interval_ms,
            ),
            rebalance: config.rebalance,
            state_models,
            bootstrap_resources: config.bootstrap_resources,
            participants: config.participants,
            weights: config.weights,
            prom_exporter,
        })
    }
}
