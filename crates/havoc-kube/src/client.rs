//! ---
//! havoc_section: "04-cluster-adapters"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Kubernetes client construction."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use std::path::Path;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::info;

/// Connect using `kubeconfig` when given, otherwise the ambient configuration
/// (`KUBECONFIG`, `~/.kube/config`, or the in-cluster service account).
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            info!(kubeconfig = %path.display(), "connecting with explicit kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("unable to read kubeconfig {}", path.display()))?;
            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .with_context(|| format!("invalid kubeconfig {}", path.display()))?;
            Client::try_from(config).context("failed to build kubernetes client")
        }
        None => Client::try_default()
            .await
            .context("failed to build kubernetes client from the default configuration"),
    }
}
