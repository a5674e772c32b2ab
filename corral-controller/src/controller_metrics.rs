use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

pub(crate) struct Metric {
    pub name: &'static str,
    description: &'static str,
}

pub(crate) const COUNTERS: [Metric; 6] = [
    TRANSITIONS_TOTAL,
    TRANSITION_FAILURES_TOTAL,
    REBALANCE_PASSES_TOTAL,
    REBALANCE_REJECTED_TOTAL,
    CAPACITY_EXCEEDED_TOTAL,
    UNDER_REPLICATED_TOTAL,
];
pub(crate) const GAUGES: [Metric; 2] = [CONTROLLER_LEADER_STATE, ASSIGNMENT_DIVERGENCE];
pub(crate) const HISTOGRAMS: [Metric; 1] = [REBALANCE_DURATION_SECONDS];

// CONTROLLER Metrics --------------------------

pub(crate) const CONTROLLER_LEADER_STATE: Metric = Metric {
    name: "corral_controller_leader_state",
    description: "Leadership state of this controller instance (0=not leading,1=leader)",
};

// REPLICA Metrics --------------------------

pub(crate) const TRANSITIONS_TOTAL: Metric = Metric {
    name: "corral_transitions_total",
    description: "Total number of replica state transitions completed",
};

pub(crate) const TRANSITION_FAILURES_TOTAL: Metric = Metric {
    name: "corral_transition_failures_total",
    description: "Total number of replica state transitions that failed",
};

// REBALANCE Metrics --------------------------

pub(crate) const REBALANCE_PASSES_TOTAL: Metric = Metric {
    name: "corral_rebalance_passes_total",
    description: "Total number of rebalance passes computed by the leader",
};

pub(crate) const REBALANCE_REJECTED_TOTAL: Metric = Metric {
    name: "corral_rebalance_rejected_total",
    description: "Candidate assignments not published because they diverged too much",
};

pub(crate) const CAPACITY_EXCEEDED_TOTAL: Metric = Metric {
    name: "corral_capacity_exceeded_total",
    description: "Replicas that could not be placed within participant capacity",
};

pub(crate) const UNDER_REPLICATED_TOTAL: Metric = Metric {
    name: "corral_under_replicated_total",
    description: "Partitions with fewer live participants than replicas",
};

pub(crate) const ASSIGNMENT_DIVERGENCE: Metric = Metric {
    name: "corral_assignment_divergence",
    description: "Divergence of the last computed assignment from the published one (0.0-1.0)",
};

pub(crate) const REBALANCE_DURATION_SECONDS: Metric = Metric {
    name: "corral_rebalance_duration_seconds",
    description: "Duration of a rebalance pass in seconds",
};

pub(crate) fn init_metrics(prom_addr: Option<std::net::SocketAddr>, instance: &str) {
    info!("initializing metrics exporter");

    if let Some(addr) = prom_addr {
        if let Err(e) = PrometheusBuilder::new()
            .with_http_listener(addr)
            .add_global_label("instance", instance.to_string())
            .install()
        {
            tracing::error!(error = %e, "failed to install Prometheus recorder");
        }
    }

    for name in COUNTERS {
        register_counter(name)
    }

    for name in GAUGES {
        register_gauge(name)
    }

    for name in HISTOGRAMS {
        register_histogram(name)
    }
}

fn register_counter(metric: Metric) {
    metrics::describe_counter!(metric.name, metric.description);
    let _counter = metrics::counter!(metric.name);
}

fn register_gauge(metric: Metric) {
    metrics::describe_gauge!(metric.name, metric.description);
    let _gauge = metrics::gauge!(metric.name);
}

fn register_histogram(metric: Metric) {
    metrics::describe_histogram!(metric.name, metric.description);
    let _histogram = metrics::histogram!(metric.name);
}
