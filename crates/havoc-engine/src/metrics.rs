//! ---
//! havoc_section: "02-chaos-engine"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Prometheus instrumentation for the chaos engine."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::Result;
use havoc_metrics::SharedRegistry;
use prometheus::{self, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts};

/// Metrics published by the chaos engine.
#[derive(Clone)]
pub struct ChaosMetrics {
    cycles_total: IntCounter,
    failures_invoked_total: IntCounter,
    repairs_total: IntCounter,
    no_safe_failures_total: IntCounter,
    steady_state_checks_total: IntCounterVec,
    pending_failures: IntGauge,
    mitigation_seconds: Histogram,
}

impl ChaosMetrics {
    /// Register the engine metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let cycles_total = IntCounter::with_opts(Opts::new(
            "havoc_cycles_total",
            "Experiment cycles completed (injection through post-repair verification)",
        ))?;
        registry.register(Box::new(cycles_total.clone()))?;

        let failures_invoked_total = IntCounter::with_opts(Opts::new(
            "havoc_failures_invoked_total",
            "Failures injected into the system under test",
        ))?;
        registry.register(Box::new(failures_invoked_total.clone()))?;

        let repairs_total = IntCounter::with_opts(Opts::new(
            "havoc_repairs_total",
            "Repairs executed while unwinding the pending-repair stack",
        ))?;
        registry.register(Box::new(repairs_total.clone()))?;

        let no_safe_failures_total = IntCounter::with_opts(Opts::new(
            "havoc_no_safe_failures_total",
            "Injection attempts skipped because no failure type was safe",
        ))?;
        registry.register(Box::new(no_safe_failures_total.clone()))?;

        let steady_state_checks_total = IntCounterVec::new(
            Opts::new(
                "havoc_steady_state_checks_total",
                "Steady-state hypothesis evaluations by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(steady_state_checks_total.clone()))?;

        let pending_failures = IntGauge::with_opts(Opts::new(
            "havoc_pending_failures",
            "Invoked failures awaiting repair",
        ))?;
        registry.register(Box::new(pending_failures.clone()))?;

        let mitigation_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "havoc_mitigation_seconds",
                "Time between the start of the mitigation wait and observed mitigation",
            )
            .buckets(prometheus::exponential_buckets(1.0, 2.0, 12)?),
        )?;
        registry.register(Box::new(mitigation_seconds.clone()))?;

        Ok(Self {
            cycles_total,
            failures_invoked_total,
            repairs_total,
            no_safe_failures_total,
            steady_state_checks_total,
            pending_failures,
            mitigation_seconds,
        })
    }

    pub fn inc_cycle(&self) {
        self.cycles_total.inc();
    }

    pub fn inc_invoked(&self) {
        self.failures_invoked_total.inc();
    }

    pub fn inc_repaired(&self) {
        self.repairs_total.inc();
    }

    pub fn inc_no_safe_failures(&self) {
        self.no_safe_failures_total.inc();
    }

    pub fn record_steady_state(&self, healthy: bool) {
        let outcome = if healthy { "healthy" } else { "violated" };
        self.steady_state_checks_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn set_pending(&self, pending: usize) {
        self.pending_failures.set(pending as i64);
    }

    pub fn observe_mitigation(&self, elapsed: Duration) {
        self.mitigation_seconds.observe(elapsed.as_secs_f64());
    }
}

impl std::fmt::Debug for ChaosMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosMetrics").finish_non_exhaustive()
    }
}
