//! Agent fan-out controller.
//!
//! Creates one ephemeral agent per target node (a DaemonSet restricted by the
//! node selector) and tears it down once every node has reported. A failed
//! or timed-out run keeps the agents around for inspection; they are
//! garbage-collected with the manager pod.

mod daemonset;
mod selector;

pub use daemonset::{
    agent_daemonset, AGENT_APP_LABEL, BUNDLE_LABEL, HOST_MOUNT_PATH, MANAGER_URL_ENV,
    NODE_NAME_ENV,
};
pub use selector::{format_node_selector, parse_node_selector};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::cluster::ClusterApi;
use crate::errors::{BundleError, Result};

/// Specification of the per-node agent workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentWorkloadDescriptor {
    /// Workload name.
    pub name: String,
    /// Namespace the workload is created in.
    pub namespace: String,
    /// Bundle the agents collect for.
    pub bundle_name: String,
    /// Agent container image.
    pub image: String,
    /// Image pull policy.
    pub pull_policy: String,
    /// URL agents upload their node bundles to.
    pub callback_url: String,
    /// Node labels the agents are restricted to.
    pub node_selector: BTreeMap<String, String>,
}

impl AgentWorkloadDescriptor {
    /// Creates a descriptor; the workload name is derived from the bundle name.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        bundle_name: impl Into<String>,
        image: impl Into<String>,
        pull_policy: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        let bundle_name = bundle_name.into();
        Self {
            name: format!("supportbundle-agent-{bundle_name}"),
            namespace: namespace.into(),
            bundle_name,
            image: image.into(),
            pull_policy: pull_policy.into(),
            callback_url: callback_url.into(),
            node_selector: BTreeMap::new(),
        }
    }

    /// Restricts the agents to nodes with these labels.
    #[must_use]
    pub fn with_node_selector(mut self, labels: BTreeMap<String, String>) -> Self {
        self.node_selector = labels;
        self
    }
}

/// Handle to a created agent workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadHandle {
    /// Workload name.
    pub name: String,
    /// Workload namespace.
    pub namespace: String,
}

impl WorkloadHandle {
    /// Creates a handle.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// Spawns and tears down the agent workload.
#[derive(Clone)]
pub struct AgentFanout {
    cluster: Arc<dyn ClusterApi>,
}

impl AgentFanout {
    /// Creates a controller backed by the given cluster API.
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Creates the agent workload.
    ///
    /// Any rejection by the orchestration API is returned as
    /// [`BundleError::Schedule`]; no node can report without agents.
    pub async fn spawn(&self, descriptor: &AgentWorkloadDescriptor) -> Result<WorkloadHandle> {
        match self.cluster.create_agents(descriptor).await {
            Ok(handle) => {
                info!(
                    name = %handle.name,
                    namespace = %handle.namespace,
                    image = %descriptor.image,
                    callback = %descriptor.callback_url,
                    "created agent daemonset"
                );
                Ok(handle)
            }
            Err(BundleError::Schedule(reason)) => Err(BundleError::Schedule(reason)),
            Err(e) => Err(BundleError::Schedule(e.to_string())),
        }
    }

    /// Deletes the agent workload.
    ///
    /// Failures are logged and returned as [`BundleError::Cleanup`]; they are
    /// not fatal to the run.
    pub async fn teardown(&self, handle: &WorkloadHandle) -> Result<()> {
        match self.cluster.delete_agents(handle).await {
            Ok(()) => {
                info!(name = %handle.name, "deleted agent daemonset");
                Ok(())
            }
            Err(e) => {
                let reason = match e {
                    BundleError::Cleanup(reason) => reason,
                    other => other.to_string(),
                };
                error!(name = %handle.name, error = %reason, "fail to cleanup agent daemonset");
                Err(BundleError::Cleanup(reason))
            }
        }
    }
}

impl std::fmt::Debug for AgentFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentFanout").finish_non_exhaustive()
    }
}
