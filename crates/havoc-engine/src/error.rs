//! ---
//! havoc_section: "02-chaos-engine"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Fatal and recoverable conditions raised by the chaos engine."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use havoc_common::MonitoredTarget;
use thiserror::Error;

/// Checkpoint in the experiment cycle, attached to diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Selecting and invoking failures.
    Injection,
    /// Polling the most recent failure for mitigation.
    MitigationWait,
    /// Steady-state re-verification before repairs start.
    PreRepair,
    /// Unwinding the pending-repair stack.
    Repair,
    /// Steady-state re-verification after all repairs.
    PostRepair,
    /// Waiting for the underlying cluster to report healthy.
    ClusterRecovery,
    /// Idle interval before the next injection.
    Pacing,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Injection => "injection",
            Phase::MitigationWait => "mitigation_wait",
            Phase::PreRepair => "pre_repair",
            Phase::Repair => "repair",
            Phase::PostRepair => "post_repair",
            Phase::ClusterRecovery => "cluster_recovery",
            Phase::Pacing => "pacing",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised by a [`crate::FailureType`] (and the catalog) when nothing is safe to invoke.
///
/// Recoverable: the orchestrator skips injection for the cycle.
#[derive(Debug, Clone, Copy, Default, Error, PartialEq, Eq)]
#[error("no failure is currently safe to invoke")]
pub struct NoSafeFailures;

/// Lifecycle action that an adapter failed to carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    Invoke,
    Repair,
}

impl fmt::Display for FailureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureAction::Invoke => f.write_str("invoke"),
            FailureAction::Repair => f.write_str("repair"),
        }
    }
}

/// Conditions that abort the whole chaos run.
#[derive(Debug, Error)]
pub enum ChaosError {
    #[error("steady-state hypothesis violated during {phase}: deployment {target} {detail}")]
    SteadyStateViolation {
        target: MonitoredTarget,
        phase: Phase,
        detail: String,
    },
    #[error("failure {failure} was not mitigated within {}s", .timeout.as_secs_f64())]
    MitigationTimeout { failure: String, timeout: Duration },
    #[error("cluster {cluster} did not become healthy within {}s after repairs", .timeout.as_secs_f64())]
    ClusterUnhealthy { cluster: String, timeout: Duration },
    #[error("unable to {action} failure {failure}")]
    FailureAction {
        failure: String,
        action: FailureAction,
        #[source]
        source: anyhow::Error,
    },
}

impl ChaosError {
    /// Stable label for metrics and structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ChaosError::SteadyStateViolation { .. } => "steady_state_violation",
            ChaosError::MitigationTimeout { .. } => "mitigation_timeout",
            ChaosError::ClusterUnhealthy { .. } => "cluster_unhealthy",
            ChaosError::FailureAction { .. } => "failure_action",
        }
    }

    /// Phase in which the condition was detected.
    pub fn phase(&self) -> Phase {
        match self {
            ChaosError::SteadyStateViolation { phase, .. } => *phase,
            ChaosError::MitigationTimeout { .. } => Phase::MitigationWait,
            ChaosError::ClusterUnhealthy { .. } => Phase::ClusterRecovery,
            ChaosError::FailureAction {
                action: FailureAction::Invoke,
                ..
            } => Phase::Injection,
            ChaosError::FailureAction {
                action: FailureAction::Repair,
                ..
            } => Phase::Repair,
        }
    }
}
