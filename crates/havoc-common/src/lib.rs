//! ---
//! havoc_section: "01-core-functionality"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Shared primitives for the chaos runner."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
//! Shared primitives for the havoc workspace: run configuration and its
//! validation, monitored-target identifiers, run ids, and tracing setup.

pub mod config;
pub mod logging;
pub mod run;
pub mod target;

pub use config::{
    ChaosConfig, ExperimentSettings, FailureTargetConfig, LoadedChaosConfig, LoggingConfig,
    MetricsConfig, StorageConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use run::RunId;
pub use target::{MonitoredTarget, TargetParseError};
