//! ---
//! havoc_section: "01-core-functionality"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Tracing subscriber setup for chaos runs."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::never;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "HAVOC_LOG";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available log formats for stdout. The run log file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Initialize the tracing subscriber for a run.
///
/// * `HAVOC_LOG` overrides the filter (e.g. `info`, `debug,kube=warn`). When unset the
///   standard `RUST_LOG` variable is honoured, finally defaulting to `info`.
/// * Events go to stdout in the configured format and to `<run_dir>/<service>.log`
///   as JSON, so every run keeps its own post-mortem trail.
pub fn init_tracing(service_name: &str, config: &LoggingConfig, run_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(run_dir)
        .with_context(|| format!("unable to create log directory {}", run_dir.display()))?;

    let file_appender = never(run_dir, format!("{}.log", service_name));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive ({}); defaulting to info logging",
                LOG_ENV, err
            );
            EnvFilter::new("info")
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let fmt_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(service = %service_name, log_dir = %run_dir.display(), format = ?config.format, "tracing initialised");
    Ok(())
}

/// Baseline subscriber for tests and tooling that do not own a run directory.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_run_directory() {
        let root = tempfile::tempdir().unwrap();
        let run_dir = root.path().join("havoc-chaos-42");
        let config = LoggingConfig {
            directory: root.path().to_path_buf(),
            format: LogFormat::Pretty,
        };
        init_tracing("havoc-test", &config, &run_dir).unwrap();
        assert!(run_dir.is_dir());
    }
}
