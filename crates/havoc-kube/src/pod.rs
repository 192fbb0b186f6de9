//! ---
//! havoc_section: "04-cluster-adapters"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Failure type that deletes a random pod matching a label selector."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use havoc_engine::{ClusterHealth, Failure, FailureType, NoSafeFailures};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams};
use kube::{Api, Client, ResourceExt};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{info, warn};

use crate::ceph::CephClusterHealth;

/// Running, not terminating, and every container reports ready.
pub fn pod_is_ready(pod: &Pod) -> bool {
    if pod.metadata.deletion_timestamp.is_some() {
        return false;
    }
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    match status.container_statuses.as_deref() {
        Some(containers) if !containers.is_empty() => {
            containers.iter().all(|container| container.ready)
        }
        _ => false,
    }
}

/// Choose the pod to delete.
pub fn pick_pod<R: Rng + ?Sized>(names: &[String], rng: &mut R) -> Option<String> {
    names.choose(rng).cloned()
}

async fn list_pods(api: &Api<Pod>, selector: &str) -> Result<Vec<Pod>> {
    let params = ListParams::default().labels(selector);
    let pods = api
        .list(&params)
        .await
        .with_context(|| format!("failed to list pods matching {selector}"))?;
    Ok(pods.items)
}

/// Deletes one pod chosen at random from those matching `selector`.
///
/// The rng is shared by every type in a catalog so a seeded run picks the same
/// pods given the same cluster state.
#[derive(Clone)]
pub struct DeletePodType {
    api: Api<Pod>,
    namespace: String,
    selector: String,
    cluster: Arc<CephClusterHealth>,
    rng: Arc<Mutex<StdRng>>,
}

impl DeletePodType {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        selector: impl Into<String>,
        cluster: Arc<CephClusterHealth>,
        rng: Arc<Mutex<StdRng>>,
    ) -> Self {
        let namespace = namespace.into();
        Self {
            api: Api::namespaced(client, &namespace),
            namespace,
            selector: selector.into(),
            cluster,
            rng,
        }
    }
}

impl fmt::Display for DeletePodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delete pod in {} matching {}", self.namespace, self.selector)
    }
}

impl fmt::Debug for DeletePodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletePodType")
            .field("namespace", &self.namespace)
            .field("selector", &self.selector)
            .field("cluster", &self.cluster)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FailureType for DeletePodType {
    async fn get(&self) -> Result<Box<dyn Failure>, NoSafeFailures> {
        match self.cluster.is_healthy(Duration::ZERO).await {
            Ok(true) => {}
            Ok(false) => {
                info!(failure_type = %self, cluster = %self.cluster, "cluster not healthy; refusing");
                return Err(NoSafeFailures);
            }
            Err(err) => {
                warn!(failure_type = %self, error = %err, "cluster health unknown; refusing");
                return Err(NoSafeFailures);
            }
        }

        let pods = match list_pods(&self.api, &self.selector).await {
            Ok(pods) => pods,
            Err(err) => {
                warn!(failure_type = %self, error = %err, "unable to list candidate pods");
                return Err(NoSafeFailures);
            }
        };
        let names: Vec<String> = pods.iter().map(|pod| pod.name_any()).collect();
        let Some(name) = pick_pod(&names, &mut *self.rng.lock()) else {
            info!(failure_type = %self, "no pods match selector");
            return Err(NoSafeFailures);
        };

        Ok(Box::new(DeletePod {
            api: self.api.clone(),
            namespace: self.namespace.clone(),
            name,
            selector: self.selector.clone(),
            cluster: self.cluster.clone(),
        }))
    }
}

/// A single pod deletion. The owning controller recreates the pod, so repair
/// has nothing to undo.
pub struct DeletePod {
    api: Api<Pod>,
    namespace: String,
    name: String,
    selector: String,
    cluster: Arc<CephClusterHealth>,
}

impl fmt::Display for DeletePod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delete pod {}/{}", self.namespace, self.name)
    }
}

impl fmt::Debug for DeletePod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletePod")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Failure for DeletePod {
    async fn invoke(&mut self) -> Result<()> {
        self.api
            .delete(&self.name, &DeleteParams::default())
            .await
            .with_context(|| format!("failed to delete pod {}/{}", self.namespace, self.name))?;
        info!(pod = %self.name, namespace = %self.namespace, "pod deleted");
        Ok(())
    }

    async fn mitigated(&self) -> Result<bool> {
        if !self.cluster.is_healthy(Duration::ZERO).await? {
            return Ok(false);
        }
        let pods = list_pods(&self.api, &self.selector).await?;
        Ok(!pods.is_empty() && pods.iter().all(pod_is_ready))
    }

    async fn repair(&mut self) -> Result<()> {
        info!(pod = %self.name, namespace = %self.namespace, "nothing to repair; pod is managed by its controller");
        Ok(())
    }
}
