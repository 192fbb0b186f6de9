//! ---
//! havoc_section: "02-chaos-engine"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Chaos experiment engine."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
//! Platform-independent chaos engine. Failures, workload status, and cluster
//! health are consumed through the capability traits re-exported here; concrete
//! adapters live in other crates.

pub mod catalog;
pub mod error;
pub mod failure;
pub mod metrics;
pub mod orchestrator;
pub mod pacing;
pub mod steady_state;
pub mod testing;

pub use catalog::FailureCatalog;
pub use error::{ChaosError, FailureAction, NoSafeFailures, Phase};
pub use failure::{Failure, FailureState, FailureType, InvokedFailure, PendingRepairs};
pub use metrics::ChaosMetrics;
pub use orchestrator::{
    await_mitigation, await_next_failure, ChaosOrchestrator, CycleReport, RunSummary,
};
pub use pacing::{ExponentialPacing, FixedPacing, PacingSchedule};
pub use steady_state::{ClusterHealth, SteadyStateMonitor, WorkloadStatus, WorkloadStatusSource};
