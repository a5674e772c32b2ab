use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "corral-controller")]
#[command(about = "Corral cluster controller and participant service", long_about = None)]
pub(crate) struct Args {
    /// Path to config file
    #[arg(long)]
    pub(crate) config_file: String,

    /// Name of this controller instance (overrides controller.instance_name)
    #[arg(long)]
    pub(crate) instance_name: Option<String>,

    /// Prometheus Exporter http address
    #[arg(long)]
    pub(crate) prom_exporter: Option<String>,
}
