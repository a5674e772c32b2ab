mod args_parse;
mod controller_metrics;
mod corral_service;
mod resources;
mod service_configuration;

use std::{fs::read_to_string, net::SocketAddr, path::Path, sync::Arc};

use crate::{
    args_parse::Args,
    controller_metrics::init_metrics,
    corral_service::CorralService,
    service_configuration::{LoadConfiguration, ServiceConfiguration},
};

use anyhow::{Context, Result};
use clap::Parser;
use corral_core::coordination::MemoryCoordinator;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse command line arguments
    let args = Args::parse();

    // Load the configuration from the specified YAML file
    let config_content = read_to_string(Path::new(&args.config_file))
        .with_context(|| format!("Failed to read config file {}", args.config_file))?;
    let load_config: LoadConfiguration =
        serde_yaml::from_str(&config_content).context("Failed to parse config file")?;

    // Attempt to transform LoadConfiguration into ServiceConfiguration
    let mut service_config: ServiceConfiguration = load_config.try_into()?;

    // If `instance_name` is provided via command-line args, override the value from the config file
    if let Some(instance_name) = args.instance_name {
        service_config.instance_name = instance_name;
    }

    // If `prom_exporter` is provided via command-line args, override the value from the config file
    if let Some(prom_exporter) = args.prom_exporter {
        let prom_address: SocketAddr = prom_exporter.parse().context(format!(
            "Failed to parse into Socket address: {}",
            prom_exporter
        ))?;
        service_config.prom_exporter = Some(prom_address);
    }

    // Init metrics with or without prometheus exporter
    init_metrics(service_config.prom_exporter, &service_config.instance_name);

    // Standalone mode keeps the cluster metadata in process
    info!("Initializing the in-memory coordination service");
    let store = Arc::new(MemoryCoordinator::new());

    info!(
        cluster = %service_config.cluster_name,
        instance = %service_config.instance_name,
        "Initializing the Corral service"
    );
    let mut corral = CorralService::new(service_config, store)?;
    corral.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for the shutdown signal")?;
    info!("Shutdown signal received");

    corral.shutdown().await
}
