//! ---
//! havoc_section: "01-core-functionality"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Chaos run configuration, defaults, and validation."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};
use tracing::debug;

use crate::logging::LogFormat;
use crate::target::MonitoredTarget;

fn default_additional_failure() -> f64 {
    0.25
}

fn default_check_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_mitigation_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_mitigation_poll() -> Duration {
    Duration::from_secs(10)
}

fn default_mttf() -> Duration {
    Duration::from_secs(150)
}

fn default_storage_namespace() -> String {
    "openshift-storage".to_owned()
}

fn default_cephcluster_name() -> String {
    "ocs-storagecluster-cephcluster".to_owned()
}

fn default_failure_targets() -> Vec<FailureTargetConfig> {
    [
        ("app", "csi-rbdplugin"),
        ("app", "csi-rbdplugin-provisioner"),
        ("app", "rook-ceph-mon"),
        ("app", "rook-ceph-osd"),
        ("app", "rook-ceph-operator"),
        ("name", "ocs-operator"),
    ]
    .into_iter()
    .map(|(key, value)| FailureTargetConfig::single(key, value))
    .collect()
}

fn default_logging_directory() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9899))
}

/// Top-level configuration for a chaos run.
///
/// Every field has a default, so an empty TOML document is a valid configuration.
/// Timing keys carry a `_secs` suffix and accept fractional seconds.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosConfig {
    /// Probability of stacking an additional simultaneous failure, in `[0, 1)`.
    #[serde(default = "default_additional_failure")]
    pub additional_failure: f64,
    /// Steady-state check interval while waiting for the next failure.
    #[serde(rename = "check_interval_secs", default = "default_check_interval")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub check_interval: Duration,
    /// Upper bound on mitigation and post-repair cluster recovery.
    #[serde(rename = "mitigation_timeout_secs", default = "default_mitigation_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub mitigation_timeout: Duration,
    /// Interval between `mitigated?` polls.
    #[serde(rename = "mitigation_poll_secs", default = "default_mitigation_poll")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub mitigation_poll: Duration,
    /// Mean time to failure.
    #[serde(rename = "mttf_secs", default = "default_mttf")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub mttf: Duration,
    /// Total run time; `0` runs until a fatal condition or the process is stopped.
    #[serde(default)]
    pub runtime_secs: i64,
    /// Deployments (`namespace/name`) whose readiness forms the steady-state hypothesis.
    #[serde(default)]
    pub monitor_deployments: Vec<String>,
    /// Kubeconfig for the cluster hosting the monitored deployments.
    #[serde(default)]
    pub monitor_cluster_config: Option<PathBuf>,
    /// Seed for failure selection and pacing; entropy is used when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where a [`ChaosConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedChaosConfig {
    pub config: ChaosConfig,
    pub source: Option<PathBuf>,
}

impl ChaosConfig {
    pub const ENV_CONFIG_PATH: &str = "HAVOC_CONFIG";

    /// Load configuration, respecting the `HAVOC_CONFIG` override.
    ///
    /// Falls back to defaults when neither the environment nor `explicit` names a file.
    /// The result is not validated yet: CLI overrides are applied on top first.
    pub fn load(explicit: Option<&Path>) -> Result<LoadedChaosConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedChaosConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        match explicit {
            Some(path) => Ok(LoadedChaosConfig {
                config: Self::from_path(path)?,
                source: Some(path.to_path_buf()),
            }),
            None => Ok(LoadedChaosConfig {
                config: Self::default(),
                source: None,
            }),
        }
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        toml::from_str::<ChaosConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.additional_failure) {
            bail!("additional failure probability must be in the range [0,1)");
        }
        for (label, value) in [
            ("mttf", self.mttf),
            ("mitigation timeout", self.mitigation_timeout),
            ("mitigation poll interval", self.mitigation_poll),
            ("steady-state check interval", self.check_interval),
        ] {
            if value.is_zero() {
                bail!("{label} must be greater than 0");
            }
        }
        if self.runtime_secs < 0 {
            bail!("runtime must be greater than or equal to 0");
        }
        self.monitored_targets()?;
        self.storage.validate()?;
        Ok(())
    }

    /// Parse the monitored deployment identifiers.
    pub fn monitored_targets(&self) -> Result<Vec<MonitoredTarget>> {
        self.monitor_deployments
            .iter()
            .map(|raw| raw.parse::<MonitoredTarget>().map_err(anyhow::Error::new))
            .collect()
    }

    /// Validate and convert into the settings consumed by the chaos engine.
    pub fn experiment(&self) -> Result<ExperimentSettings> {
        self.validate()?;
        let runtime = match self.runtime_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs.unsigned_abs())),
        };
        Ok(ExperimentSettings {
            additional_failure: self.additional_failure,
            check_interval: self.check_interval,
            mitigation_timeout: self.mitigation_timeout,
            mitigation_poll: self.mitigation_poll,
            mttf: self.mttf,
            runtime,
            monitored: self.monitored_targets()?,
            seed: self.seed,
        })
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            additional_failure: default_additional_failure(),
            check_interval: default_check_interval(),
            mitigation_timeout: default_mitigation_timeout(),
            mitigation_poll: default_mitigation_poll(),
            mttf: default_mttf(),
            runtime_secs: 0,
            monitor_deployments: Vec::new(),
            monitor_cluster_config: None,
            seed: None,
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl std::str::FromStr for ChaosConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: ChaosConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Validated, engine-facing view of a [`ChaosConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentSettings {
    pub additional_failure: f64,
    pub check_interval: Duration,
    pub mitigation_timeout: Duration,
    pub mitigation_poll: Duration,
    pub mttf: Duration,
    /// `None` runs indefinitely.
    pub runtime: Option<Duration>,
    pub monitored: Vec<MonitoredTarget>,
    pub seed: Option<u64>,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            additional_failure: default_additional_failure(),
            check_interval: default_check_interval(),
            mitigation_timeout: default_mitigation_timeout(),
            mitigation_poll: default_mitigation_poll(),
            mttf: default_mttf(),
            runtime: None,
            monitored: Vec::new(),
            seed: None,
        }
    }
}

/// The storage cluster under test and the pods eligible for deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_namespace")]
    pub namespace: String,
    #[serde(default = "default_cephcluster_name")]
    pub cephcluster_name: String,
    #[serde(default = "default_failure_targets")]
    pub failure_targets: Vec<FailureTargetConfig>,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            bail!("storage namespace cannot be empty");
        }
        if self.cephcluster_name.trim().is_empty() {
            bail!("cephcluster name cannot be empty");
        }
        for (index, target) in self.failure_targets.iter().enumerate() {
            if target.labels.is_empty() {
                bail!("failure target #{index} must declare at least one label");
            }
            if target
                .labels
                .iter()
                .any(|(key, value)| key.trim().is_empty() || value.trim().is_empty())
            {
                bail!("failure target #{index} contains an empty label key or value");
            }
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            namespace: default_storage_namespace(),
            cephcluster_name: default_cephcluster_name(),
            failure_targets: default_failure_targets(),
        }
    }
}

/// A label selector naming a set of pods that may be deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureTargetConfig {
    pub labels: IndexMap<String, String>,
}

impl FailureTargetConfig {
    pub fn single(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut labels = IndexMap::new();
        labels.insert(key.into(), value.into());
        Self { labels }
    }

    /// Render as a Kubernetes label selector (`k1=v1,k2=v2`).
    pub fn selector(&self) -> String {
        self.labels
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Parent directory; each run writes into its own `havoc-chaos-<run id>` folder.
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}
