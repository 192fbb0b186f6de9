//! ---
//! havoc_section: "02-chaos-engine"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "In-memory capabilities for exercising the engine without a cluster."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
//! In-memory implementations of the engine capabilities.
//!
//! Every fake writes to a shared [`Journal`], so tests can assert on the exact
//! interleaving of invocations, polls, repairs, and steady-state checks.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use havoc_common::MonitoredTarget;
use parking_lot::Mutex;

use crate::error::NoSafeFailures;
use crate::failure::{Failure, FailureType};
use crate::steady_state::{ClusterHealth, WorkloadStatus, WorkloadStatusSource};

/// Ordered record of calls made against the fakes.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn entries_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }
}

#[derive(Debug, Clone, Copy)]
enum Mitigation {
    AfterPolls(usize),
    Never,
}

/// Failure type whose instances are named `<name>-<n>` and behave as configured.
#[derive(Debug)]
pub struct ScriptedFailureType {
    name: String,
    journal: Journal,
    safe: AtomicBool,
    issued: AtomicUsize,
    budget: Option<usize>,
    mitigation: Mitigation,
    fail_invoke_from: Option<usize>,
    fail_repair_from: Option<usize>,
}

impl ScriptedFailureType {
    /// Always safe, unlimited instances, mitigated on the first poll.
    pub fn new(name: impl Into<String>, journal: Journal) -> Self {
        Self {
            name: name.into(),
            journal,
            safe: AtomicBool::new(true),
            issued: AtomicUsize::new(0),
            budget: None,
            mitigation: Mitigation::AfterPolls(1),
            fail_invoke_from: None,
            fail_repair_from: None,
        }
    }

    pub fn unsafe_now(self) -> Self {
        self.safe.store(false, Ordering::SeqCst);
        self
    }

    /// Refuse with [`NoSafeFailures`] once `budget` instances have been handed out.
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn mitigated_after(mut self, polls: usize) -> Self {
        self.mitigation = Mitigation::AfterPolls(polls);
        self
    }

    pub fn never_mitigated(mut self) -> Self {
        self.mitigation = Mitigation::Never;
        self
    }

    pub fn failing_invoke(self) -> Self {
        self.failing_invoke_from(1)
    }

    /// Instances numbered `ordinal` and later fail to invoke.
    pub fn failing_invoke_from(mut self, ordinal: usize) -> Self {
        self.fail_invoke_from = Some(ordinal);
        self
    }

    pub fn failing_repair(self) -> Self {
        self.failing_repair_from(1)
    }

    /// Instances numbered `ordinal` and later fail to repair.
    pub fn failing_repair_from(mut self, ordinal: usize) -> Self {
        self.fail_repair_from = Some(ordinal);
        self
    }
}

impl fmt::Display for ScriptedFailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scripted {}", self.name)
    }
}

#[async_trait]
impl FailureType for ScriptedFailureType {
    async fn get(&self) -> Result<Box<dyn Failure>, NoSafeFailures> {
        self.journal.record(format!("get:{}", self.name));
        if !self.safe.load(Ordering::SeqCst) {
            return Err(NoSafeFailures);
        }
        let issued = self.issued.load(Ordering::SeqCst);
        if self.budget.is_some_and(|budget| issued >= budget) {
            return Err(NoSafeFailures);
        }
        let ordinal = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(ScriptedFailure {
            name: format!("{}-{}", self.name, ordinal),
            journal: self.journal.clone(),
            polls: AtomicUsize::new(0),
            mitigation: self.mitigation,
            fail_invoke: self.fail_invoke_from.is_some_and(|from| ordinal >= from),
            fail_repair: self.fail_repair_from.is_some_and(|from| ordinal >= from),
        }))
    }
}

/// Instance produced by [`ScriptedFailureType`].
#[derive(Debug)]
pub struct ScriptedFailure {
    name: String,
    journal: Journal,
    polls: AtomicUsize,
    mitigation: Mitigation,
    fail_invoke: bool,
    fail_repair: bool,
}

impl fmt::Display for ScriptedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[async_trait]
impl Failure for ScriptedFailure {
    async fn invoke(&mut self) -> anyhow::Result<()> {
        self.journal.record(format!("invoke:{}", self.name));
        if self.fail_invoke {
            return Err(anyhow!("scripted invoke failure"));
        }
        Ok(())
    }

    async fn mitigated(&self) -> anyhow::Result<bool> {
        self.journal.record(format!("mitigated?:{}", self.name));
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(match self.mitigation {
            Mitigation::AfterPolls(needed) => polls >= needed,
            Mitigation::Never => false,
        })
    }

    async fn repair(&mut self) -> anyhow::Result<()> {
        self.journal.record(format!("repair:{}", self.name));
        if self.fail_repair {
            return Err(anyhow!("scripted repair failure"));
        }
        Ok(())
    }
}

/// Workload status table; unknown targets report an error.
#[derive(Debug, Clone, Default)]
pub struct StaticWorkloads {
    statuses: Arc<Mutex<HashMap<MonitoredTarget, WorkloadStatus>>>,
    journal: Journal,
}

impl StaticWorkloads {
    pub fn new(journal: Journal) -> Self {
        Self {
            statuses: Arc::default(),
            journal,
        }
    }

    pub fn set(&self, target: &MonitoredTarget, desired: i32, ready: i32) {
        self.insert(target, desired, Some(ready));
    }

    /// The workload exists but has not reported a ready count.
    pub fn set_unreported(&self, target: &MonitoredTarget, desired: i32) {
        self.insert(target, desired, None);
    }

    fn insert(&self, target: &MonitoredTarget, desired: i32, ready: Option<i32>) {
        self.statuses.lock().insert(
            target.clone(),
            WorkloadStatus {
                desired_replicas: desired,
                ready_replicas: ready,
            },
        );
    }
}

#[async_trait]
impl WorkloadStatusSource for StaticWorkloads {
    async fn workload_status(&self, target: &MonitoredTarget) -> anyhow::Result<WorkloadStatus> {
        self.journal.record(format!("status:{target}"));
        self.statuses
            .lock()
            .get(target)
            .copied()
            .ok_or_else(|| anyhow!("deployment {target} not found"))
    }
}

/// Cluster health flag.
#[derive(Debug, Clone)]
pub struct StaticClusterHealth {
    healthy: Arc<AtomicBool>,
    journal: Journal,
}

impl StaticClusterHealth {
    pub fn new(healthy: bool, journal: Journal) -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(healthy)),
            journal,
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

impl fmt::Display for StaticClusterHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("static-cluster")
    }
}

#[async_trait]
impl ClusterHealth for StaticClusterHealth {
    async fn is_healthy(&self, timeout: Duration) -> anyhow::Result<bool> {
        self.journal
            .record(format!("cluster_healthy?:{}", timeout.as_secs()));
        Ok(self.healthy.load(Ordering::SeqCst))
    }
}
