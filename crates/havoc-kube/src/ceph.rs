//! ---
//! havoc_section: "04-cluster-adapters"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Rook CephCluster health probe."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use havoc_engine::ClusterHealth;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Interval between `CephCluster` status reads while waiting for health.
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

const HEALTH_OK: &str = "HEALTH_OK";

/// Health of a Rook-managed Ceph cluster, read from its `CephCluster` resource.
#[derive(Clone)]
pub struct CephClusterHealth {
    api: Api<DynamicObject>,
    namespace: String,
    name: String,
}

impl CephClusterHealth {
    pub fn new(client: Client, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let gvk = GroupVersionKind::gvk("ceph.rook.io", "v1", "CephCluster");
        let resource = ApiResource::from_gvk(&gvk);
        Self {
            api: Api::namespaced_with(client, &namespace, &resource),
            namespace,
            name: name.into(),
        }
    }

    /// Read `status.ceph.health` once.
    pub async fn current_health(&self) -> Result<Option<String>> {
        let cluster = self
            .api
            .get(&self.name)
            .await
            .with_context(|| format!("failed to read CephCluster {self}"))?;
        Ok(reported_health(&cluster).map(str::to_owned))
    }
}

/// The health string Ceph reports through the Rook operator, if any.
pub fn reported_health(cluster: &DynamicObject) -> Option<&str> {
    cluster
        .data
        .pointer("/status/ceph/health")
        .and_then(serde_json::Value::as_str)
}

impl fmt::Display for CephClusterHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl fmt::Debug for CephClusterHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CephClusterHealth")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ClusterHealth for CephClusterHealth {
    /// Poll until `HEALTH_OK` or `timeout`. A zero timeout probes exactly once.
    async fn is_healthy(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.current_health().await {
                Ok(Some(health)) if health == HEALTH_OK => return Ok(true),
                Ok(health) => {
                    debug!(cluster = %self, health = ?health, "ceph cluster not healthy yet")
                }
                Err(err) => warn!(cluster = %self, error = %err, "ceph health probe failed"),
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => HEALTH_POLL_INTERVAL,
            };
            if remaining.is_zero() {
                return Ok(false);
            }
            sleep(HEALTH_POLL_INTERVAL.min(remaining)).await;
        }
    }
}
