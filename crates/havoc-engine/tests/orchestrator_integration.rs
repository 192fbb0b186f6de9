//! ---
//! havoc_section: "02-chaos-engine"
//! havoc_subsection: "test"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "End-to-end experiment cycles against in-memory capabilities."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use havoc_common::{ExperimentSettings, MonitoredTarget};
use havoc_engine::testing::{Journal, ScriptedFailureType, StaticClusterHealth, StaticWorkloads};
use havoc_engine::{
    ChaosError, ChaosMetrics, ChaosOrchestrator, FailureAction, FailureCatalog, FailureType,
    FixedPacing, Phase, SteadyStateMonitor,
};
use havoc_metrics::new_registry;

struct Harness {
    journal: Journal,
    app: MonitoredTarget,
    workloads: StaticWorkloads,
    cluster: StaticClusterHealth,
}

impl Harness {
    fn new() -> Self {
        havoc_common::logging::init_for_tests();
        let journal = Journal::default();
        let app = MonitoredTarget::new("ns", "app");
        let workloads = StaticWorkloads::new(journal.clone());
        workloads.set(&app, 3, 3);
        let cluster = StaticClusterHealth::new(true, journal.clone());
        Self {
            journal,
            app,
            workloads,
            cluster,
        }
    }

    fn settings(&self, additional_failure: f64) -> ExperimentSettings {
        ExperimentSettings {
            additional_failure,
            monitored: vec![self.app.clone()],
            seed: Some(7),
            ..ExperimentSettings::default()
        }
    }

    fn orchestrator(
        &self,
        settings: ExperimentSettings,
        kinds: Vec<ScriptedFailureType>,
    ) -> ChaosOrchestrator {
        let catalog = FailureCatalog::new(
            kinds
                .into_iter()
                .map(|kind| Arc::new(kind) as Arc<dyn FailureType>)
                .collect(),
        );
        let monitor =
            SteadyStateMonitor::new(settings.monitored.clone(), Arc::new(self.workloads.clone()));
        ChaosOrchestrator::new(settings, catalog, monitor, Arc::new(self.cluster.clone()))
            .with_pacing(Box::new(FixedPacing::new(Duration::from_secs(60))))
    }

    fn lifecycle(&self) -> Vec<String> {
        self.journal
            .entries()
            .into_iter()
            .filter(|entry| {
                entry.starts_with("invoke:")
                    || entry.starts_with("mitigated?:")
                    || entry.starts_with("repair:")
            })
            .collect()
    }
}

fn counter_value(registry: &havoc_metrics::SharedRegistry, name: &str) -> f64 {
    registry
        .gather()
        .iter()
        .find(|family| family.get_name() == name)
        .map(|family| family.get_metric()[0].get_counter().get_value())
        .unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn single_failure_per_cycle_without_stacking() {
    let harness = Harness::new();
    let kind = ScriptedFailureType::new("a", harness.journal.clone());
    let mut orchestrator = harness.orchestrator(harness.settings(0.0), vec![kind]);

    for cycle in 1..=3u64 {
        let report = orchestrator.run_cycle(None).await.unwrap();
        assert_eq!(report.cycle, cycle);
        assert_eq!(report.invoked.len(), 1);
        assert_eq!(report.repaired, report.invoked);
        assert!(orchestrator.pending().is_empty());
    }
    assert_eq!(
        harness.lifecycle(),
        vec![
            "invoke:a-1",
            "mitigated?:a-1",
            "repair:a-1",
            "invoke:a-2",
            "mitigated?:a-2",
            "repair:a-2",
            "invoke:a-3",
            "mitigated?:a-3",
            "repair:a-3",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn stacked_failures_repair_newest_first() {
    let harness = Harness::new();
    let kind = ScriptedFailureType::new("a", harness.journal.clone()).with_budget(3);
    let mut orchestrator = harness.orchestrator(harness.settings(0.999_999_999), vec![kind]);

    let report = orchestrator.run_cycle(None).await.unwrap();
    assert_eq!(report.invoked, vec!["a-1", "a-2", "a-3"]);
    assert_eq!(report.repaired, vec!["a-3", "a-2", "a-1"]);
    assert!(orchestrator.pending().is_empty());
    assert_eq!(
        harness.journal.entries_with_prefix("mitigated?:"),
        vec!["mitigated?:a-3"]
    );
}

#[tokio::test(start_paused = true)]
async fn nothing_safe_skips_straight_to_pacing() {
    let harness = Harness::new();
    let registry = new_registry();
    let metrics = ChaosMetrics::new(registry.clone()).unwrap();
    let kind = ScriptedFailureType::new("a", harness.journal.clone()).unsafe_now();
    let mut orchestrator = harness
        .orchestrator(harness.settings(0.5), vec![kind])
        .with_metrics(metrics);

    let report = orchestrator.run_cycle(None).await.unwrap();
    assert!(report.invoked.is_empty());
    assert!(report.repaired.is_empty());
    assert_eq!(report.mitigation, None);
    assert_eq!(report.pacing_wait, Duration::from_secs(60));
    assert_eq!(report.pacing_checks, 2);
    assert_eq!(harness.journal.count("invoke:"), 0);
    assert_eq!(counter_value(&registry, "havoc_no_safe_failures_total"), 1.0);
    assert_eq!(counter_value(&registry, "havoc_cycles_total"), 1.0);
}

#[tokio::test(start_paused = true)]
async fn under_replicated_deployment_aborts_without_repairs() {
    let harness = Harness::new();
    harness.workloads.set(&harness.app, 3, 2);
    let kind = ScriptedFailureType::new("a", harness.journal.clone());
    let mut orchestrator = harness.orchestrator(harness.settings(0.0), vec![kind]);

    let err = orchestrator.run().await.unwrap_err();
    match &err {
        ChaosError::SteadyStateViolation { target, phase, .. } => {
            assert_eq!(target, &harness.app);
            assert_eq!(*phase, Phase::MitigationWait);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("ns/app has 2/3 ready replicas"));
    assert_eq!(orchestrator.pending().descriptions(), vec!["a-1"]);
    assert_eq!(harness.journal.count("repair:"), 0);
}

#[tokio::test(start_paused = true)]
async fn mitigation_timeout_repairs_before_aborting() {
    let harness = Harness::new();
    let kind = ScriptedFailureType::new("a", harness.journal.clone()).never_mitigated();
    let settings = ExperimentSettings {
        mitigation_timeout: Duration::from_secs(30),
        ..harness.settings(0.0)
    };
    let mut orchestrator = harness.orchestrator(settings, vec![kind]);

    let err = orchestrator.run().await.unwrap_err();
    assert!(matches!(err, ChaosError::MitigationTimeout { ref failure, .. } if failure == "a-1"));
    assert_eq!(harness.journal.entries_with_prefix("repair:"), vec!["repair:a-1"]);
    assert!(orchestrator.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unhealthy_cluster_after_repairs_aborts() {
    let harness = Harness::new();
    harness.cluster.set_healthy(false);
    let kind = ScriptedFailureType::new("a", harness.journal.clone());
    let mut orchestrator = harness.orchestrator(harness.settings(0.0), vec![kind]);

    let err = orchestrator.run().await.unwrap_err();
    assert_eq!(err.reason(), "cluster_unhealthy");
    assert_eq!(err.phase(), Phase::ClusterRecovery);
    assert_eq!(harness.journal.count("repair:"), 1);
    assert_eq!(harness.journal.entries_with_prefix("cluster_healthy?:"), vec!["cluster_healthy?:900"]);
}

#[tokio::test(start_paused = true)]
async fn failed_invoke_repairs_what_was_already_stacked() {
    let harness = Harness::new();
    let kind = ScriptedFailureType::new("a", harness.journal.clone()).failing_invoke_from(2);
    let mut orchestrator = harness.orchestrator(harness.settings(0.999_999_999), vec![kind]);

    let err = orchestrator.run().await.unwrap_err();
    match &err {
        ChaosError::FailureAction {
            failure,
            action: FailureAction::Invoke,
            ..
        } => assert_eq!(failure, "a-2"),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(
        harness.lifecycle(),
        vec!["invoke:a-1", "invoke:a-2", "repair:a-1"]
    );
    assert!(orchestrator.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unrepairable_failure_stays_pending_after_forced_repairs() {
    let harness = Harness::new();
    let kind = ScriptedFailureType::new("a", harness.journal.clone())
        .with_budget(2)
        .never_mitigated()
        .failing_repair_from(2);
    let settings = ExperimentSettings {
        mitigation_timeout: Duration::from_secs(30),
        ..harness.settings(0.999_999_999)
    };
    let mut orchestrator = harness.orchestrator(settings, vec![kind]);

    let err = orchestrator.run().await.unwrap_err();
    assert!(matches!(err, ChaosError::MitigationTimeout { ref failure, .. } if failure == "a-2"));
    assert_eq!(
        harness.journal.entries_with_prefix("repair:"),
        vec!["repair:a-2", "repair:a-1"]
    );
    assert_eq!(orchestrator.pending().descriptions(), vec!["a-2"]);
}

#[tokio::test(start_paused = true)]
async fn pacing_wait_checks_steady_state_on_interval() {
    let harness = Harness::new();
    let kind = ScriptedFailureType::new("a", harness.journal.clone());
    let mut orchestrator = harness
        .orchestrator(harness.settings(0.0), vec![kind])
        .with_pacing(Box::new(FixedPacing::new(Duration::from_secs(150))));

    let report = orchestrator.run_cycle(None).await.unwrap();
    assert_eq!(report.pacing_wait, Duration::from_secs(150));
    assert!(report.pacing_checks >= 4);
}

#[tokio::test(start_paused = true)]
async fn bounded_runtime_ends_the_run() {
    let harness = Harness::new();
    let kind = ScriptedFailureType::new("a", harness.journal.clone()).mitigated_after(2);
    let settings = ExperimentSettings {
        runtime: Some(Duration::from_secs(600)),
        ..harness.settings(0.25)
    };
    let mut orchestrator = harness.orchestrator(settings, vec![kind]);

    let summary = orchestrator.run().await.unwrap();
    assert!(summary.cycles >= 1);
    assert!(summary.elapsed >= Duration::from_secs(600));
    assert_eq!(summary.failures_invoked, summary.repairs);
    assert!(orchestrator.pending().is_empty());
}
