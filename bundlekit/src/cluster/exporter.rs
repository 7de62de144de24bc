//! Cluster bundle exporter.
//!
//! The full resource dump (object kinds, discovery, pod logs) is produced by
//! an external exporter. [`MetadataExporter`] writes the bundle envelope that
//! every bundle carries and decides the final archive name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::ClusterApi;
use crate::core::BundleRequest;
use crate::errors::{BundleError, Result};
use crate::utils::{bundle_file_name, now_rfc3339};

/// Version of the bundle layout.
pub const BUNDLE_VERSION: &str = "0.1.0";

/// Produces the cluster-bundle tree.
#[async_trait]
pub trait ClusterExporter: Send + Sync {
    /// Writes the cluster bundle into `bundle_dir` and returns the file name
    /// the final archive must use.
    async fn generate(&self, request: &BundleRequest, bundle_dir: &Path) -> Result<String>;
}

/// Contents of `metadata.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMeta {
    /// Product the bundle was collected for.
    pub project_name: String,
    /// Bundle layout version.
    pub bundle_version: String,
    /// API server git version.
    pub kubernetes_version: String,
    /// UID of the namespace the bundle record lives in.
    pub project_namespace_uuid: String,
    /// Creation time (RFC 3339).
    pub bundle_created_at: String,
    /// Issue URL from the request.
    #[serde(default)]
    pub issue_url: String,
    /// Issue description from the request.
    #[serde(default)]
    pub issue_description: String,
}

/// Writes `metadata.yaml` and an error log into the cluster bundle.
pub struct MetadataExporter {
    cluster: Arc<dyn ClusterApi>,
    project_name: String,
}

impl MetadataExporter {
    /// Creates an exporter.
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterApi>, project_name: impl Into<String>) -> Self {
        Self {
            cluster,
            project_name: project_name.into(),
        }
    }
}

#[async_trait]
impl ClusterExporter for MetadataExporter {
    async fn generate(&self, request: &BundleRequest, bundle_dir: &Path) -> Result<String> {
        debug!(dir = %bundle_dir.display(), "generating cluster bundle");

        let namespace_uid = self
            .cluster
            .namespace_uid(&request.namespace)
            .await
            .map_err(|e| BundleError::Exporter(format!("cannot get namespace: {e}")))?;
        let kubernetes_version = self
            .cluster
            .kubernetes_version()
            .await
            .map_err(|e| BundleError::Exporter(format!("cannot get kubernetes version: {e}")))?;

        let meta = BundleMeta {
            project_name: self.project_name.clone(),
            bundle_version: BUNDLE_VERSION.to_string(),
            kubernetes_version,
            project_namespace_uuid: namespace_uid,
            bundle_created_at: now_rfc3339(),
            issue_url: request.issue_url.clone().unwrap_or_default(),
            issue_description: request.description.clone().unwrap_or_default(),
        };
        let file_name = bundle_file_name(&meta.project_namespace_uuid, &meta.bundle_created_at);

        let yaml = serde_yaml::to_string(&meta)
            .map_err(|e| BundleError::Exporter(format!("cannot encode metadata: {e}")))?;
        tokio::fs::create_dir_all(bundle_dir).await?;
        tokio::fs::write(bundle_dir.join("metadata.yaml"), yaml).await?;
        tokio::fs::write(bundle_dir.join("bundleGenerationError.log"), b"").await?;

        Ok(file_name)
    }
}

impl std::fmt::Debug for MetadataExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataExporter")
            .field("project_name", &self.project_name)
            .finish_non_exhaustive()
    }
}
