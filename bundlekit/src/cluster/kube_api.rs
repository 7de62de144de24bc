//! [`ClusterApi`] backed by kube-rs.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Namespace, Node};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use std::collections::BTreeSet;
use tracing::debug;

use super::ClusterApi;
use crate::agents::{agent_daemonset, AgentWorkloadDescriptor, WorkloadHandle};
use crate::errors::{BundleError, Result};

/// Talks to the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Wraps an existing client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from in-cluster config or the local kubeconfig.
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_nodes(&self, selector: &str) -> Result<BTreeSet<String>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let params = if selector.trim().is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(selector)
        };

        let list = nodes.list(&params).await?;
        let names: BTreeSet<String> = list
            .items
            .into_iter()
            .filter_map(|node| node.metadata.name)
            .collect();
        debug!(selector = %selector, count = names.len(), "listed nodes");
        Ok(names)
    }

    async fn namespace_uid(&self, namespace: &str) -> Result<String> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = api.get(namespace).await?;
        ns.metadata
            .uid
            .ok_or_else(|| BundleError::Internal(format!("namespace {namespace} has no uid")))
    }

    async fn kubernetes_version(&self) -> Result<String> {
        let info = self.client.apiserver_version().await?;
        Ok(info.git_version)
    }

    async fn create_agents(&self, descriptor: &AgentWorkloadDescriptor) -> Result<WorkloadHandle> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &descriptor.namespace);
        let created = api
            .create(&PostParams::default(), &agent_daemonset(descriptor))
            .await
            .map_err(|e| BundleError::Schedule(e.to_string()))?;

        Ok(WorkloadHandle::new(
            created.metadata.name.unwrap_or_else(|| descriptor.name.clone()),
            descriptor.namespace.clone(),
        ))
    }

    async fn delete_agents(&self, handle: &WorkloadHandle) -> Result<()> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &handle.namespace);
        api.delete(&handle.name, &DeleteParams::background())
            .await
            .map_err(|e| BundleError::Cleanup(e.to_string()))?;
        Ok(())
    }
}

impl std::fmt::Debug for KubeClusterApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterApi").finish_non_exhaustive()
    }
}
