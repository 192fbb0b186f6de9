//! ---
//! havoc_section: "05-entrypoints"
//! havoc_subsection: "binary"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Binary entrypoint for the havoc chaos runner."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use havoc_common::{init_tracing, ChaosConfig, ExperimentSettings, LogFormat, RunId};
use havoc_engine::{ChaosError, ChaosMetrics, ChaosOrchestrator, RunSummary, SteadyStateMonitor};
use havoc_kube::{connect, storage_failure_catalog, CephClusterHealth, KubeWorkloadStatus};
use havoc_metrics::{new_registry, spawn_http_server, MetricsServer, RunMetrics};
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Inject failures into a Rook/Ceph storage cluster while verifying steady state",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "PROBABILITY",
        help = "Probability of stacking an additional simultaneous failure, in [0,1)"
    )]
    additional_failure: Option<f64>,

    #[arg(
        long,
        value_name = "SECONDS",
        value_parser = parse_seconds,
        help = "Steady-state check interval while waiting for the next failure"
    )]
    check_interval: Option<Duration>,

    #[arg(
        long,
        value_name = "SECONDS",
        value_parser = parse_seconds,
        help = "Time allowed for mitigation and for cluster recovery after repairs"
    )]
    mitigation_timeout: Option<Duration>,

    #[arg(
        long,
        value_name = "SECONDS",
        value_parser = parse_seconds,
        help = "Mean time to failure"
    )]
    mttf: Option<Duration>,

    #[arg(
        short = 't',
        long,
        value_name = "SECONDS",
        allow_negative_numbers = true,
        help = "Total run time; 0 runs until stopped"
    )]
    runtime: Option<i64>,

    #[arg(
        long = "monitor-deployment",
        value_name = "NAMESPACE/NAME",
        help = "Deployment whose readiness is part of the steady state (repeatable)"
    )]
    monitor_deployments: Vec<String>,

    #[arg(long, value_name = "NAME", help = "Name of the CephCluster resource")]
    cephcluster_name: Option<String>,

    #[arg(long, value_name = "NAMESPACE", help = "Namespace of the storage cluster")]
    ocs_namespace: Option<String>,

    #[arg(
        long = "monitor-deployment-cluster-config",
        value_name = "KUBECONFIG",
        help = "Kubeconfig for the cluster hosting the monitored deployments"
    )]
    monitor_cluster_config: Option<PathBuf>,

    #[arg(
        short = 'l',
        long,
        value_name = "DIR",
        help = "Directory under which the run's log directory is created"
    )]
    log_dir: Option<PathBuf>,

    #[arg(long, value_enum, help = "Stdout log format")]
    log_format: Option<CliLogFormat>,

    #[arg(long, help = "Seed for failure selection and pacing")]
    seed: Option<u64>,

    #[arg(
        long,
        value_name = "ADDR",
        help = "Serve Prometheus metrics on this address"
    )]
    metrics_listen: Option<SocketAddr>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogFormat {
    StructuredJson,
    Pretty,
}

impl From<CliLogFormat> for LogFormat {
    fn from(value: CliLogFormat) -> Self {
        match value {
            CliLogFormat::StructuredJson => LogFormat::StructuredJson,
            CliLogFormat::Pretty => LogFormat::Pretty,
        }
    }
}

/// Fractional seconds, e.g. `0.5` or `150`.
fn parse_seconds(raw: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = raw
        .parse()
        .map_err(|err| format!("invalid number of seconds: {err}"))?;
    Duration::try_from_secs_f64(secs).map_err(|err| format!("invalid number of seconds: {err}"))
}

impl Cli {
    /// Layer explicitly passed flags over the loaded configuration.
    fn apply(&self, config: &mut ChaosConfig) {
        if let Some(value) = self.additional_failure {
            config.additional_failure = value;
        }
        if let Some(value) = self.check_interval {
            config.check_interval = value;
        }
        if let Some(value) = self.mitigation_timeout {
            config.mitigation_timeout = value;
        }
        if let Some(value) = self.mttf {
            config.mttf = value;
        }
        if let Some(value) = self.runtime {
            config.runtime_secs = value;
        }
        if !self.monitor_deployments.is_empty() {
            config.monitor_deployments = self.monitor_deployments.clone();
        }
        if let Some(value) = &self.cephcluster_name {
            config.storage.cephcluster_name = value.clone();
        }
        if let Some(value) = &self.ocs_namespace {
            config.storage.namespace = value.clone();
        }
        if let Some(value) = &self.monitor_cluster_config {
            config.monitor_cluster_config = Some(value.clone());
        }
        if let Some(value) = &self.log_dir {
            config.logging.directory = value.clone();
        }
        if let Some(value) = self.log_format {
            config.logging.format = value.into();
        }
        if let Some(value) = self.seed {
            config.seed = Some(value);
        }
        if let Some(value) = self.metrics_listen {
            config.metrics.enabled = true;
            config.metrics.listen = value;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = ChaosConfig::load(cli.config.as_deref())?;
    let mut config = loaded.config;
    cli.apply(&mut config);
    let settings = config
        .experiment()
        .context("invalid chaos run configuration")?;

    let run_id = RunId::generate();
    let log_dir = run_id.log_dir(&config.logging.directory);
    init_tracing("havoc", &config.logging, &log_dir)?;

    info!(
        run_id = %run_id,
        config_source = ?loaded.source,
        log_dir = %log_dir.display(),
        monitored_deployments = settings.monitored.len(),
        "chaos run starting"
    );
    info!(config = ?config, "effective configuration");

    let span = info_span!("chaos_run", run_id = %run_id);
    run(config, settings).instrument(span).await
}

async fn run(config: ChaosConfig, settings: ExperimentSettings) -> Result<()> {
    let registry = new_registry();
    let run_metrics = RunMetrics::new(registry.clone())?;
    run_metrics.set_build_info(env!("CARGO_PKG_VERSION"));
    run_metrics.inc_start();
    let chaos_metrics = ChaosMetrics::new(registry.clone())?;

    let metrics_server = if config.metrics.enabled {
        let server = spawn_http_server(registry, config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let storage_client = connect(None).await?;
    let monitor_client = match &config.monitor_cluster_config {
        Some(path) => connect(Some(path.as_path())).await?,
        None => storage_client.clone(),
    };

    let cluster = Arc::new(CephClusterHealth::new(
        storage_client.clone(),
        config.storage.namespace.clone(),
        config.storage.cephcluster_name.clone(),
    ));
    let catalog = storage_failure_catalog(
        &storage_client,
        &config.storage,
        cluster.clone(),
        settings.seed,
    );
    info!(failure_types = catalog.len(), cluster = %cluster, "failure catalog assembled");

    let monitor = SteadyStateMonitor::new(
        settings.monitored.clone(),
        Arc::new(KubeWorkloadStatus::new(monitor_client)),
    );
    let mut orchestrator =
        ChaosOrchestrator::new(settings, catalog, monitor, cluster).with_metrics(chaos_metrics);

    let outcome = orchestrator.run().await;
    conclude(outcome, &run_metrics, metrics_server).await
}

/// Count an abort while the exporter is still up, then stop the exporter.
///
/// The orchestrator has already logged the abort. An exporter shutdown error is
/// logged and never replaces the run's own outcome.
async fn conclude(
    outcome: std::result::Result<RunSummary, ChaosError>,
    run_metrics: &RunMetrics,
    metrics_server: Option<MetricsServer>,
) -> Result<()> {
    if let Err(err) = &outcome {
        run_metrics.record_abort(err.reason());
    }
    if let Some(server) = metrics_server {
        if let Err(err) = server.shutdown().await {
            warn!(error = %err, "metrics exporter did not shut down cleanly");
        }
    }
    match outcome {
        Ok(summary) => {
            info!(
                cycles = summary.cycles,
                failures_invoked = summary.failures_invoked,
                repairs = summary.repairs,
                "chaos run completed"
            );
            Ok(())
        }
        Err(err) => Err(anyhow::Error::new(err).context("chaos run aborted")),
    }
}
