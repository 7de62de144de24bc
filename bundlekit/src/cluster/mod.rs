//! Cluster-facing collaborators.
//!
//! - [`ClusterApi`]: the orchestration calls the coordinator needs (node
//!   listing, agent workload lifecycle, identifiers for bundle naming)
//! - [`ClusterExporter`]: produces the cluster-bundle tree in the working dir

mod exporter;
mod kube_api;

pub use exporter::{BundleMeta, ClusterExporter, MetadataExporter, BUNDLE_VERSION};
pub use kube_api::KubeClusterApi;

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::agents::{AgentWorkloadDescriptor, WorkloadHandle};
use crate::errors::Result;

/// The orchestration API, as seen by the coordinator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Lists the names of nodes matching a label selector (empty = all nodes).
    async fn list_nodes(&self, selector: &str) -> Result<BTreeSet<String>>;

    /// Returns the UID of a namespace.
    async fn namespace_uid(&self, namespace: &str) -> Result<String>;

    /// Returns the API server version string.
    async fn kubernetes_version(&self) -> Result<String>;

    /// Creates the per-node agent workload.
    async fn create_agents(&self, descriptor: &AgentWorkloadDescriptor) -> Result<WorkloadHandle>;

    /// Deletes the per-node agent workload.
    async fn delete_agents(&self, handle: &WorkloadHandle) -> Result<()>;
}
