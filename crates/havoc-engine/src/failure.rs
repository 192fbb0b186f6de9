//! ---
//! havoc_section: "02-chaos-engine"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Failure capabilities, lifecycle tracking, and the pending-repair stack."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{ChaosError, FailureAction, NoSafeFailures};
use crate::metrics::ChaosMetrics;

/// A unit of damage applied to the system under test.
///
/// `Display` describes the concrete action and its target (e.g. the pod being deleted).
#[async_trait]
pub trait Failure: Send + Sync + fmt::Display {
    /// Apply the damage.
    async fn invoke(&mut self) -> anyhow::Result<()>;

    /// Non-blocking check whether the system has recovered on its own.
    async fn mitigated(&self) -> anyhow::Result<bool>;

    /// Undo the damage. Called exactly once per invoked failure.
    async fn repair(&mut self) -> anyhow::Result<()>;
}

/// Factory for failures of one kind.
///
/// `get` must only hand out an instance that is safe to invoke right now.
#[async_trait]
pub trait FailureType: Send + Sync + fmt::Display {
    async fn get(&self) -> Result<Box<dyn Failure>, NoSafeFailures>;
}

/// Lifecycle of a failure owned by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureState {
    Invoked,
    Mitigated,
    TimedOut,
    Repaired,
}

impl FailureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureState::Invoked => "invoked",
            FailureState::Mitigated => "mitigated",
            FailureState::TimedOut => "timed_out",
            FailureState::Repaired => "repaired",
        }
    }
}

impl fmt::Display for FailureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure that has been applied and is awaiting repair.
pub struct InvokedFailure {
    failure: Box<dyn Failure>,
    description: String,
    state: FailureState,
    invoked_at: DateTime<Utc>,
}

impl InvokedFailure {
    /// Invoke `failure` and start tracking it in the `invoked` state.
    pub async fn invoke(mut failure: Box<dyn Failure>) -> Result<Self, ChaosError> {
        let description = failure.to_string();
        info!(failure = %description, "invoking failure");
        failure
            .invoke()
            .await
            .map_err(|source| ChaosError::FailureAction {
                failure: description.clone(),
                action: FailureAction::Invoke,
                source,
            })?;
        Ok(Self {
            failure,
            description,
            state: FailureState::Invoked,
            invoked_at: Utc::now(),
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn state(&self) -> FailureState {
        self.state
    }

    pub fn invoked_at(&self) -> DateTime<Utc> {
        self.invoked_at
    }

    /// Poll the failure once. Adapter errors count as "not yet mitigated".
    pub async fn poll_mitigated(&mut self) -> bool {
        match self.failure.mitigated().await {
            Ok(true) => {
                if self.state == FailureState::Invoked {
                    self.state = FailureState::Mitigated;
                }
                true
            }
            Ok(false) => false,
            Err(err) => {
                warn!(failure = %self.description, error = %err, "mitigation probe failed");
                false
            }
        }
    }

    pub fn mark_timed_out(&mut self) {
        if self.state != FailureState::Repaired {
            self.state = FailureState::TimedOut;
        }
    }

    /// Repair the failure. Returns `false` without touching the adapter if it was
    /// already repaired.
    pub async fn repair(&mut self) -> Result<bool, ChaosError> {
        if self.state == FailureState::Repaired {
            debug!(failure = %self.description, "repair skipped; already repaired");
            return Ok(false);
        }
        info!(failure = %self.description, state = %self.state, "repairing failure");
        self.failure
            .repair()
            .await
            .map_err(|source| ChaosError::FailureAction {
                failure: self.description.clone(),
                action: FailureAction::Repair,
                source,
            })?;
        self.state = FailureState::Repaired;
        Ok(true)
    }
}

impl fmt::Debug for InvokedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokedFailure")
            .field("description", &self.description)
            .field("state", &self.state)
            .field("invoked_at", &self.invoked_at)
            .finish_non_exhaustive()
    }
}

/// Stack of invoked failures; repairs always run newest-first.
#[derive(Debug, Default)]
pub struct PendingRepairs {
    stack: Vec<InvokedFailure>,
    metrics: Option<ChaosMetrics>,
}

impl PendingRepairs {
    pub fn new(metrics: Option<ChaosMetrics>) -> Self {
        Self {
            stack: Vec::new(),
            metrics,
        }
    }

    pub fn push(&mut self, failure: InvokedFailure) {
        self.stack.push(failure);
        self.publish_len();
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Most recently invoked failure.
    pub fn latest_mut(&mut self) -> Option<&mut InvokedFailure> {
        self.stack.last_mut()
    }

    /// Descriptions in invocation order.
    pub fn descriptions(&self) -> Vec<String> {
        self.stack
            .iter()
            .map(|failure| failure.description().to_owned())
            .collect()
    }

    /// Repair every pending failure in reverse invocation order and clear the stack.
    ///
    /// Returns the repaired descriptions in the order the repairs ran. On a repair
    /// error the failing entry and everything older stay on the stack.
    pub async fn unwind(&mut self) -> Result<Vec<String>, ChaosError> {
        let mut repaired = Vec::with_capacity(self.stack.len());
        while let Some(mut failure) = self.stack.pop() {
            match failure.repair().await {
                Ok(fresh) => {
                    self.record_repair(fresh);
                    repaired.push(failure.description);
                }
                Err(err) => {
                    self.stack.push(failure);
                    return Err(err);
                }
            }
        }
        Ok(repaired)
    }

    /// Attempt every pending repair newest-first, continuing past errors.
    ///
    /// Failures that could not be repaired stay on the stack in invocation order;
    /// their errors are returned in the order the repairs ran.
    pub async fn unwind_best_effort(&mut self) -> Vec<ChaosError> {
        let mut unrepaired = Vec::new();
        let mut errors = Vec::new();
        while let Some(mut failure) = self.stack.pop() {
            match failure.repair().await {
                Ok(fresh) => self.record_repair(fresh),
                Err(err) => {
                    unrepaired.push(failure);
                    errors.push(err);
                }
            }
        }
        unrepaired.reverse();
        self.stack = unrepaired;
        self.publish_len();
        errors
    }

    fn record_repair(&self, fresh: bool) {
        self.publish_len();
        if fresh {
            if let Some(metrics) = &self.metrics {
                metrics.inc_repaired();
            }
        }
    }

    fn publish_len(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_pending(self.stack.len());
        }
    }
}
