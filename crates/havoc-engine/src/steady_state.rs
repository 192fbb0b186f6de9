//! ---
//! havoc_section: "02-chaos-engine"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Steady-state hypothesis checks over monitored workloads."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
//! The steady-state hypothesis: every monitored deployment has all of its
//! desired replicas ready. Any check that fails is fatal to the run.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use havoc_common::MonitoredTarget;
use tracing::{error, info};

use crate::error::{ChaosError, Phase};
use crate::metrics::ChaosMetrics;

/// Replica counts reported for a workload.
///
/// `ready_replicas` is `None` when the workload has not reported a ready count yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkloadStatus {
    pub desired_replicas: i32,
    pub ready_replicas: Option<i32>,
}

impl WorkloadStatus {
    /// Ready only when a ready count was reported and it equals the desired count.
    pub fn is_ready(&self) -> bool {
        self.ready_replicas == Some(self.desired_replicas)
    }
}

/// Reads replica status for a monitored workload.
#[async_trait]
pub trait WorkloadStatusSource: Send + Sync {
    async fn workload_status(&self, target: &MonitoredTarget) -> anyhow::Result<WorkloadStatus>;
}

/// Health predicate for the infrastructure the failures are injected into.
#[async_trait]
pub trait ClusterHealth: Send + Sync + fmt::Display {
    /// Wait up to `timeout` for the cluster to report healthy.
    async fn is_healthy(&self, timeout: Duration) -> anyhow::Result<bool>;
}

/// Evaluates the steady-state hypothesis over a fixed set of targets.
#[derive(Clone)]
pub struct SteadyStateMonitor {
    targets: Vec<MonitoredTarget>,
    source: Arc<dyn WorkloadStatusSource>,
    metrics: Option<ChaosMetrics>,
}

impl SteadyStateMonitor {
    pub fn new(targets: Vec<MonitoredTarget>, source: Arc<dyn WorkloadStatusSource>) -> Self {
        Self {
            targets,
            source,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ChaosMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn targets(&self) -> &[MonitoredTarget] {
        &self.targets
    }

    /// Check every target, stopping at the first one that is not ready.
    ///
    /// An unreachable target counts as not ready.
    pub async fn verify(&self, phase: Phase) -> Result<(), ChaosError> {
        for target in &self.targets {
            let detail = match self.source.workload_status(target).await {
                Ok(status) if status.is_ready() => {
                    info!(
                        %target,
                        %phase,
                        replicas = status.desired_replicas,
                        "monitored deployment healthy"
                    );
                    continue;
                }
                Ok(WorkloadStatus {
                    desired_replicas,
                    ready_replicas: Some(ready),
                }) => format!("has {ready}/{desired_replicas} ready replicas"),
                Ok(WorkloadStatus {
                    desired_replicas, ..
                }) => format!("reports no ready replicas (desired {desired_replicas})"),
                Err(err) => format!("status unavailable: {err:#}"),
            };
            error!(%target, %phase, %detail, "steady-state hypothesis violated");
            self.record(false);
            return Err(ChaosError::SteadyStateViolation {
                target: target.clone(),
                phase,
                detail,
            });
        }
        self.record(true);
        Ok(())
    }

    fn record(&self, healthy: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_steady_state(healthy);
        }
    }
}

impl fmt::Debug for SteadyStateMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SteadyStateMonitor")
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Journal, StaticWorkloads};

    fn monitor(workloads: &StaticWorkloads, targets: &[&MonitoredTarget]) -> SteadyStateMonitor {
        SteadyStateMonitor::new(
            targets.iter().map(|t| (*t).clone()).collect(),
            Arc::new(workloads.clone()),
        )
    }

    #[tokio::test]
    async fn under_replicated_target_aborts() {
        let app = MonitoredTarget::new("ns", "app");
        let workloads = StaticWorkloads::new(Journal::default());
        workloads.set(&app, 3, 2);

        let err = monitor(&workloads, &[&app])
            .verify(Phase::PreRepair)
            .await
            .unwrap_err();
        match err {
            ChaosError::SteadyStateViolation {
                target,
                phase,
                detail,
            } => {
                assert_eq!(target, app);
                assert_eq!(phase, Phase::PreRepair);
                assert_eq!(detail, "has 2/3 ready replicas");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn stops_at_first_failing_target() {
        let journal = Journal::default();
        let first = MonitoredTarget::new("ns", "first");
        let second = MonitoredTarget::new("ns", "second");
        let third = MonitoredTarget::new("ns", "third");
        let workloads = StaticWorkloads::new(journal.clone());
        workloads.set(&first, 1, 1);
        workloads.set(&second, 2, 0);
        workloads.set(&third, 1, 1);

        let result = monitor(&workloads, &[&first, &second, &third])
            .verify(Phase::Pacing)
            .await;
        assert!(result.is_err());
        assert_eq!(
            journal.entries(),
            vec!["status:ns/first", "status:ns/second"]
        );
    }

    #[test]
    fn missing_ready_count_is_never_ready() {
        let unreported = WorkloadStatus {
            desired_replicas: 0,
            ready_replicas: None,
        };
        assert!(!unreported.is_ready());
        let scaled_down = WorkloadStatus {
            desired_replicas: 0,
            ready_replicas: Some(0),
        };
        assert!(scaled_down.is_ready());
    }

    #[tokio::test]
    async fn unreported_ready_count_aborts() {
        let app = MonitoredTarget::new("ns", "app");
        let workloads = StaticWorkloads::new(Journal::default());
        workloads.set_unreported(&app, 2);
        let err = monitor(&workloads, &[&app])
            .verify(Phase::Pacing)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("reports no ready replicas (desired 2)"), "{err}");
    }

    #[tokio::test]
    async fn unreachable_target_counts_as_not_ready() {
        let missing = MonitoredTarget::new("ns", "gone");
        let workloads = StaticWorkloads::new(Journal::default());
        let err = monitor(&workloads, &[&missing])
            .verify(Phase::PostRepair)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("status unavailable"));
    }

    #[tokio::test]
    async fn healthy_targets_and_empty_set_pass() {
        let app = MonitoredTarget::new("ns", "app");
        let workloads = StaticWorkloads::new(Journal::default());
        workloads.set(&app, 3, 3);
        monitor(&workloads, &[&app])
            .verify(Phase::MitigationWait)
            .await
            .unwrap();
        monitor(&workloads, &[]).verify(Phase::Pacing).await.unwrap();
    }
}
