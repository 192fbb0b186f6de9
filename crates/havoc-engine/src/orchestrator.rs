//! ---
//! havoc_section: "02-chaos-engine"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Experiment loop: inject, await mitigation, verify, repair, pace."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
//! The experiment loop.
//!
//! One cycle injects one or more failures, waits for the system under test to
//! mitigate the most recent one, repairs everything newest-first, and then idles
//! for a randomised interval. The steady-state hypothesis is checked at every
//! step and any violation ends the run.

use std::sync::Arc;
use std::time::Duration;

use havoc_common::ExperimentSettings;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::catalog::FailureCatalog;
use crate::error::{ChaosError, NoSafeFailures, Phase};
use crate::failure::{InvokedFailure, PendingRepairs};
use crate::metrics::ChaosMetrics;
use crate::pacing::{ExponentialPacing, PacingSchedule};
use crate::steady_state::{ClusterHealth, SteadyStateMonitor};

/// Poll `failure` until it reports mitigated or `timeout` lapses.
///
/// The steady-state hypothesis is verified before every poll, so it is checked at
/// least once even for a failure that is mitigated immediately. Returns `false` on
/// timeout.
pub async fn await_mitigation(
    monitor: &SteadyStateMonitor,
    failure: &mut InvokedFailure,
    timeout: Duration,
    poll: Duration,
) -> Result<bool, ChaosError> {
    let deadline = Instant::now().checked_add(timeout);
    info!(
        failure = %failure.description(),
        timeout_secs = timeout.as_secs_f64(),
        "awaiting mitigation"
    );
    loop {
        monitor.verify(Phase::MitigationWait).await?;
        let remaining = remaining_until(deadline);
        if remaining.is_zero() {
            return Ok(false);
        }
        if failure.poll_mitigated().await {
            info!(failure = %failure.description(), "failure mitigated");
            return Ok(true);
        }
        debug!(failure = %failure.description(), "failure not yet mitigated");
        let remaining = remaining_until(deadline);
        if remaining.is_zero() {
            return Ok(false);
        }
        sleep(poll.min(remaining)).await;
    }
}

/// Idle for `wait`, verifying the steady-state hypothesis immediately and then
/// every `check_interval`. Returns the number of checks performed.
pub async fn await_next_failure(
    monitor: &SteadyStateMonitor,
    wait: Duration,
    check_interval: Duration,
) -> Result<usize, ChaosError> {
    let deadline = Instant::now().checked_add(wait);
    info!(wait_secs = wait.as_secs_f64(), "awaiting next failure");
    let mut checks = 0;
    loop {
        monitor.verify(Phase::Pacing).await?;
        checks += 1;
        let remaining = remaining_until(deadline);
        if remaining.is_zero() {
            break;
        }
        if remaining <= check_interval {
            sleep(remaining).await;
            break;
        }
        sleep(check_interval).await;
    }
    Ok(checks)
}

fn remaining_until(deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()),
        None => Duration::MAX,
    }
}

/// Outcome of a single completed cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    /// Failures invoked this cycle, in invocation order.
    pub invoked: Vec<String>,
    /// Failures repaired this cycle, in repair order.
    pub repaired: Vec<String>,
    /// Time until the most recent failure was observed mitigated.
    pub mitigation: Option<Duration>,
    /// Idle interval before the next cycle.
    pub pacing_wait: Duration,
    /// Steady-state checks made while pacing.
    pub pacing_checks: usize,
}

/// Totals across a whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub cycles: u64,
    pub failures_invoked: usize,
    pub repairs: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    fn absorb(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.failures_invoked += report.invoked.len();
        self.repairs += report.repaired.len();
    }
}

/// Drives experiment cycles until the runtime budget is spent or a fatal condition
/// is hit.
pub struct ChaosOrchestrator {
    settings: ExperimentSettings,
    catalog: FailureCatalog,
    monitor: SteadyStateMonitor,
    cluster: Arc<dyn ClusterHealth>,
    pacing: Box<dyn PacingSchedule>,
    pending: PendingRepairs,
    rng: StdRng,
    metrics: Option<ChaosMetrics>,
    cycle: u64,
}

impl ChaosOrchestrator {
    pub fn new(
        settings: ExperimentSettings,
        catalog: FailureCatalog,
        monitor: SteadyStateMonitor,
        cluster: Arc<dyn ClusterHealth>,
    ) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let pacing = Box::new(ExponentialPacing::new(settings.mttf));
        Self {
            settings,
            catalog,
            monitor,
            cluster,
            pacing,
            pending: PendingRepairs::default(),
            rng,
            metrics: None,
            cycle: 0,
        }
    }

    pub fn with_pacing(mut self, pacing: Box<dyn PacingSchedule>) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_metrics(mut self, metrics: ChaosMetrics) -> Self {
        self.pending = PendingRepairs::new(Some(metrics.clone()));
        self.monitor = self.monitor.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    /// Failures invoked but not yet repaired.
    pub fn pending(&self) -> &PendingRepairs {
        &self.pending
    }

    /// Run cycles back to back. The runtime budget is checked between cycles only,
    /// so a cycle that has started always finishes its repairs.
    pub async fn run(&mut self) -> Result<RunSummary, ChaosError> {
        let started = Instant::now();
        let deadline = self
            .settings
            .runtime
            .and_then(|runtime| started.checked_add(runtime));
        info!(
            additional_failure = self.settings.additional_failure,
            mttf_secs = self.settings.mttf.as_secs_f64(),
            check_interval_secs = self.settings.check_interval.as_secs_f64(),
            mitigation_timeout_secs = self.settings.mitigation_timeout.as_secs_f64(),
            runtime_secs = self.settings.runtime.map(|r| r.as_secs()),
            monitored = self.monitor.targets().len(),
            failure_types = self.catalog.len(),
            "starting chaos run"
        );
        if self.catalog.is_empty() {
            warn!("failure catalog is empty; cycles will only verify steady state");
        }

        let mut summary = RunSummary::default();
        loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                info!(cycles = summary.cycles, "runtime budget exhausted");
                break;
            }
            match self.run_cycle(deadline).await {
                Ok(report) => summary.absorb(&report),
                Err(err) => {
                    error!(
                        reason = err.reason(),
                        phase = %err.phase(),
                        pending = ?self.pending.descriptions(),
                        error = %err,
                        "chaos run aborted"
                    );
                    return Err(err);
                }
            }
        }
        summary.elapsed = started.elapsed();
        info!(
            cycles = summary.cycles,
            failures_invoked = summary.failures_invoked,
            repairs = summary.repairs,
            elapsed_secs = summary.elapsed.as_secs(),
            "chaos run finished"
        );
        Ok(summary)
    }

    /// Execute one full cycle. A bounded `deadline` clips the trailing pacing wait.
    pub async fn run_cycle(&mut self, deadline: Option<Instant>) -> Result<CycleReport, ChaosError> {
        self.cycle += 1;
        let span = info_span!("cycle", cycle = self.cycle);
        self.cycle_inner(deadline).instrument(span).await
    }

    async fn cycle_inner(&mut self, deadline: Option<Instant>) -> Result<CycleReport, ChaosError> {
        let mut report = CycleReport {
            cycle: self.cycle,
            ..CycleReport::default()
        };

        self.inject(&mut report).await?;

        if let Some(latest) = self.pending.latest_mut() {
            let started = Instant::now();
            let mitigated = await_mitigation(
                &self.monitor,
                latest,
                self.settings.mitigation_timeout,
                self.settings.mitigation_poll,
            )
            .await?;
            if mitigated {
                let elapsed = started.elapsed();
                if let Some(metrics) = &self.metrics {
                    metrics.observe_mitigation(elapsed);
                }
                report.mitigation = Some(elapsed);
            } else {
                latest.mark_timed_out();
                let err = ChaosError::MitigationTimeout {
                    failure: latest.description().to_owned(),
                    timeout: self.settings.mitigation_timeout,
                };
                error!(error = %err, "mitigation not observed; repairing before abort");
                return Err(self.repair_then(err).await);
            }
        }

        self.monitor.verify(Phase::PreRepair).await?;
        report.repaired = self.pending.unwind().await?;
        self.monitor.verify(Phase::PostRepair).await?;
        self.await_cluster_recovery().await?;

        if let Some(metrics) = &self.metrics {
            metrics.inc_cycle();
        }
        info!(
            invoked = report.invoked.len(),
            repaired = report.repaired.len(),
            "cycle complete"
        );

        let wait = self.pacing.next_wait(&mut self.rng);
        report.pacing_wait = match deadline {
            Some(deadline) => wait.min(deadline.saturating_duration_since(Instant::now())),
            None => wait,
        };
        report.pacing_checks =
            await_next_failure(&self.monitor, report.pacing_wait, self.settings.check_interval)
                .await?;
        Ok(report)
    }

    /// Invoke a safe failure, then keep stacking further ones while the
    /// additional-failure roll succeeds.
    async fn inject(&mut self, report: &mut CycleReport) -> Result<(), ChaosError> {
        loop {
            let failure = match self.catalog.select_safe(&mut self.rng).await {
                Ok(failure) => failure,
                Err(NoSafeFailures) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_no_safe_failures();
                    }
                    warn!(
                        pending = self.pending.len(),
                        "no failure is safe to invoke; skipping injection"
                    );
                    return Ok(());
                }
            };
            let invoked = match InvokedFailure::invoke(failure).await {
                Ok(invoked) => invoked,
                Err(err) => return Err(self.repair_then(err).await),
            };
            report.invoked.push(invoked.description().to_owned());
            if let Some(metrics) = &self.metrics {
                metrics.inc_invoked();
            }
            self.pending.push(invoked);

            if self.rng.gen::<f64>() >= self.settings.additional_failure {
                return Ok(());
            }
            info!(
                pending = self.pending.len(),
                "stacking an additional simultaneous failure"
            );
        }
    }

    async fn await_cluster_recovery(&self) -> Result<(), ChaosError> {
        let timeout = self.settings.mitigation_timeout;
        info!(cluster = %self.cluster, timeout_secs = timeout.as_secs_f64(), "awaiting cluster health");
        let healthy = match self.cluster.is_healthy(timeout).await {
            Ok(healthy) => healthy,
            Err(err) => {
                warn!(cluster = %self.cluster, error = %err, "cluster health probe failed");
                false
            }
        };
        if healthy {
            info!(cluster = %self.cluster, "cluster healthy");
            Ok(())
        } else {
            Err(ChaosError::ClusterUnhealthy {
                cluster: self.cluster.to_string(),
                timeout,
            })
        }
    }

    /// Force-repair everything still pending, then hand back `err`.
    ///
    /// Entries whose repair fails stay pending so the abort log names them.
    async fn repair_then(&mut self, err: ChaosError) -> ChaosError {
        for repair_err in self.pending.unwind_best_effort().await {
            error!(error = %repair_err, "repair failed while aborting");
        }
        err
    }
}

impl std::fmt::Debug for ChaosOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosOrchestrator")
            .field("settings", &self.settings)
            .field("catalog", &self.catalog)
            .field("pacing", &self.pacing)
            .field("pending", &self.pending.descriptions())
            .field("cycle", &self.cycle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Journal, ScriptedFailureType, StaticWorkloads};
    use crate::FailureType;
    use havoc_common::MonitoredTarget;

    fn healthy_monitor(journal: &Journal) -> (SteadyStateMonitor, StaticWorkloads) {
        let app = MonitoredTarget::new("ns", "app");
        let workloads = StaticWorkloads::new(journal.clone());
        workloads.set(&app, 3, 3);
        let monitor = SteadyStateMonitor::new(vec![app], Arc::new(workloads.clone()));
        (monitor, workloads)
    }

    async fn invoked(kind: &ScriptedFailureType) -> InvokedFailure {
        InvokedFailure::invoke(kind.get().await.unwrap())
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn mitigation_observed_before_timeout() {
        let journal = Journal::default();
        let (monitor, _) = healthy_monitor(&journal);
        let kind = ScriptedFailureType::new("a", journal.clone()).mitigated_after(3);
        let mut failure = invoked(&kind).await;

        let started = Instant::now();
        let mitigated = await_mitigation(
            &monitor,
            &mut failure,
            Duration::from_secs(60),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert!(mitigated);
        assert_eq!(started.elapsed(), Duration::from_secs(20));
        assert_eq!(journal.count("mitigated?:"), 3);
        assert_eq!(journal.count("status:"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn mitigation_times_out_after_checking_steady_state() {
        let journal = Journal::default();
        let (monitor, _) = healthy_monitor(&journal);
        let kind = ScriptedFailureType::new("a", journal.clone()).never_mitigated();
        let mut failure = invoked(&kind).await;

        let started = Instant::now();
        let mitigated = await_mitigation(
            &monitor,
            &mut failure,
            Duration::from_secs(25),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert!(!mitigated);
        assert_eq!(started.elapsed(), Duration::from_secs(25));
        assert!(journal.count("status:") >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mitigation_on_the_deadline_is_too_late() {
        let journal = Journal::default();
        let (monitor, _) = healthy_monitor(&journal);
        let kind = ScriptedFailureType::new("a", journal.clone()).mitigated_after(3);
        let mut failure = invoked(&kind).await;

        let mitigated = await_mitigation(
            &monitor,
            &mut failure,
            Duration::from_secs(20),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert!(!mitigated);
        assert_eq!(journal.count("mitigated?:"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn violation_during_mitigation_wait_is_fatal() {
        let journal = Journal::default();
        let (monitor, workloads) = healthy_monitor(&journal);
        workloads.set(&MonitoredTarget::new("ns", "app"), 3, 1);
        let kind = ScriptedFailureType::new("a", journal.clone());
        let mut failure = invoked(&kind).await;

        let err = await_mitigation(
            &monitor,
            &mut failure,
            Duration::from_secs(60),
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();
        assert_eq!(err.phase(), Phase::MitigationWait);
        assert_eq!(journal.count("mitigated?:"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_wait_checks_on_interval() {
        let journal = Journal::default();
        let (monitor, _) = healthy_monitor(&journal);
        let started = Instant::now();
        let checks = await_next_failure(&monitor, Duration::from_secs(150), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(checks, 5);
        assert_eq!(started.elapsed(), Duration::from_secs(150));

        let checks = await_next_failure(&monitor, Duration::ZERO, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(checks, 1);
    }
}
