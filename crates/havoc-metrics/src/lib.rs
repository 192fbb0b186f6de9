//! ---
//! havoc_section: "03-observability"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Metrics collection and export utilities."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address (resolves port `0` to the assigned port).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Process-level metrics for the chaos runner binary.
#[derive(Clone)]
pub struct RunMetrics {
    runs_started_total: IntCounter,
    run_aborts_total: IntCounterVec,
    build_info: GaugeVec,
}

impl RunMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let runs_started_total = IntCounter::with_opts(Opts::new(
            "havoc_runs_started_total",
            "Total number of chaos runs started by this process",
        ))?;
        registry.register(Box::new(runs_started_total.clone()))?;

        let run_aborts_total = IntCounterVec::new(
            Opts::new(
                "havoc_run_aborts_total",
                "Chaos runs terminated by a fatal condition, by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(run_aborts_total.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new("havoc_build_info", "Build metadata for the running binary"),
            &["version"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            runs_started_total,
            run_aborts_total,
            build_info,
        })
    }

    pub fn inc_start(&self) {
        self.runs_started_total.inc();
    }

    pub fn record_abort(&self, reason: &str) {
        self.run_aborts_total.with_label_values(&[reason]).inc();
    }

    pub fn set_build_info(&self, version: &str) {
        self.build_info.with_label_values(&[version]).set(1.0);
    }
}

impl std::fmt::Debug for RunMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunMetrics").finish_non_exhaustive()
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn run_metrics_register_families() {
        let registry = new_registry();
        let metrics = RunMetrics::new(registry.clone()).unwrap();
        metrics.inc_start();
        metrics.record_abort("steady_state_violation");
        metrics.set_build_info("0.1.0");
        let names: Vec<_> = registry
            .gather()
            .iter()
            .map(|fam| fam.get_name().to_string())
            .collect();
        assert!(names.contains(&"havoc_runs_started_total".to_string()));
        assert!(names.contains(&"havoc_run_aborts_total".to_string()));
        assert!(names.contains(&"havoc_build_info".to_string()));
    }

    #[tokio::test]
    async fn exporter_serves_registry() {
        let registry = new_registry();
        let metrics = RunMetrics::new(registry.clone()).unwrap();
        metrics.inc_start();
        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();

        let mut stream = tokio::net::TcpStream::connect(server.addr()).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        let content_type = response
            .lines()
            .find_map(|line| line.strip_prefix("content-type: "))
            .unwrap();
        assert_eq!(content_type, prometheus::TEXT_FORMAT);
        assert!(response.contains("havoc_runs_started_total 1"));

        server.shutdown().await.unwrap();
    }
}
