//! ---
//! havoc_section: "04-cluster-adapters"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Kubernetes adapters for the chaos engine capabilities."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
//! Kubernetes implementations of the engine capabilities: deployment status for
//! the steady-state monitor, Rook/Ceph cluster health, and pod deletion failures.

pub mod ceph;
pub mod client;
pub mod pod;
pub mod workload;

use std::sync::Arc;

use havoc_common::StorageConfig;
use havoc_engine::{FailureCatalog, FailureType};
use kube::Client;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub use ceph::CephClusterHealth;
pub use client::connect;
pub use pod::{DeletePod, DeletePodType};
pub use workload::KubeWorkloadStatus;

/// One pod-deletion failure type per configured label selector.
///
/// With a `seed`, pod choice is reproducible; otherwise it draws from entropy.
pub fn storage_failure_catalog(
    client: &Client,
    storage: &StorageConfig,
    cluster: Arc<CephClusterHealth>,
    seed: Option<u64>,
) -> FailureCatalog {
    let rng = Arc::new(Mutex::new(match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }));
    let types = storage
        .failure_targets
        .iter()
        .map(|target| {
            Arc::new(DeletePodType::new(
                client.clone(),
                storage.namespace.clone(),
                target.selector(),
                cluster.clone(),
                rng.clone(),
            )) as Arc<dyn FailureType>
        })
        .collect();
    FailureCatalog::new(types)
}
