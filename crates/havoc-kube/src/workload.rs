//! ---
//! havoc_section: "04-cluster-adapters"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Deployment replica status for the steady-state monitor."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use havoc_common::MonitoredTarget;
use havoc_engine::{WorkloadStatus, WorkloadStatusSource};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};

/// Reads `apps/v1` Deployment replica counts.
#[derive(Clone)]
pub struct KubeWorkloadStatus {
    client: Client,
}

impl KubeWorkloadStatus {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Desired replicas come from `spec.replicas` (the API server defaults it to 1).
/// The ready count is passed through as reported; the API omits it until a
/// replica becomes ready.
pub fn deployment_status(deployment: &Deployment) -> WorkloadStatus {
    let desired_replicas = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let ready_replicas = deployment
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas);
    WorkloadStatus {
        desired_replicas,
        ready_replicas,
    }
}

#[async_trait]
impl WorkloadStatusSource for KubeWorkloadStatus {
    async fn workload_status(&self, target: &MonitoredTarget) -> Result<WorkloadStatus> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), target.namespace());
        let deployment = api
            .get_opt(target.name())
            .await
            .with_context(|| format!("failed to read deployment {target}"))?
            .ok_or_else(|| anyhow!("deployment {target} not found"))?;
        Ok(deployment_status(&deployment))
    }
}

impl std::fmt::Debug for KubeWorkloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeWorkloadStatus").finish_non_exhaustive()
    }
}
