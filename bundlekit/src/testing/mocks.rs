//! In-memory fakes for the cluster-facing collaborators and the event sink.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::Path;

use crate::agents::{AgentWorkloadDescriptor, WorkloadHandle};
use crate::cluster::{ClusterApi, ClusterExporter};
use crate::core::BundleRequest;
use crate::errors::{BundleError, Result};
use crate::events::{BundleEvent, EventSink};

/// A cluster with a fixed node list that records agent lifecycle calls.
#[derive(Debug, Default)]
pub struct FakeClusterApi {
    nodes: Mutex<BTreeSet<String>>,
    create_error: Mutex<Option<String>>,
    delete_error: Mutex<Option<String>>,
    selectors: Mutex<Vec<String>>,
    created: Mutex<Vec<AgentWorkloadDescriptor>>,
    deleted: Mutex<Vec<WorkloadHandle>>,
}

impl FakeClusterApi {
    /// Creates a cluster with the given nodes.
    #[must_use]
    pub fn with_nodes<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fake = Self::default();
        *fake.nodes.lock() = nodes.into_iter().map(Into::into).collect();
        fake
    }

    /// Makes agent creation fail with `reason`.
    #[must_use]
    pub fn failing_create(self, reason: impl Into<String>) -> Self {
        *self.create_error.lock() = Some(reason.into());
        self
    }

    /// Makes agent deletion fail with `reason`.
    #[must_use]
    pub fn failing_delete(self, reason: impl Into<String>) -> Self {
        *self.delete_error.lock() = Some(reason.into());
        self
    }

    /// Descriptors passed to `create_agents`.
    #[must_use]
    pub fn created(&self) -> Vec<AgentWorkloadDescriptor> {
        self.created.lock().clone()
    }

    /// Handles passed to `delete_agents`.
    #[must_use]
    pub fn deleted(&self) -> Vec<WorkloadHandle> {
        self.deleted.lock().clone()
    }

    /// Selectors passed to `list_nodes`.
    #[must_use]
    pub fn listed_selectors(&self) -> Vec<String> {
        self.selectors.lock().clone()
    }
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn list_nodes(&self, selector: &str) -> Result<BTreeSet<String>> {
        self.selectors.lock().push(selector.to_string());
        Ok(self.nodes.lock().clone())
    }

    async fn namespace_uid(&self, _namespace: &str) -> Result<String> {
        Ok("0e6a2f0c-5a4e-4b8e-9d0b-1f2e3d4c5b6a".to_string())
    }

    async fn kubernetes_version(&self) -> Result<String> {
        Ok("v1.29.4".to_string())
    }

    async fn create_agents(&self, descriptor: &AgentWorkloadDescriptor) -> Result<WorkloadHandle> {
        if let Some(reason) = self.create_error.lock().clone() {
            return Err(BundleError::Schedule(reason));
        }
        self.created.lock().push(descriptor.clone());
        Ok(WorkloadHandle::new(&descriptor.name, &descriptor.namespace))
    }

    async fn delete_agents(&self, handle: &WorkloadHandle) -> Result<()> {
        self.deleted.lock().push(handle.clone());
        match self.delete_error.lock().clone() {
            Some(reason) => Err(BundleError::Cleanup(reason)),
            None => Ok(()),
        }
    }
}

/// An exporter writing one placeholder file and returning a fixed name.
#[derive(Debug)]
pub struct FakeExporter {
    file_name: String,
    error: Option<String>,
    calls: Mutex<usize>,
}

impl FakeExporter {
    /// File name returned by default.
    pub const FILE_NAME: &'static str = "supportbundle_test_2024-03-09T07-05-01Z.tar.gz";

    /// Creates an exporter returning [`Self::FILE_NAME`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            file_name: Self::FILE_NAME.to_string(),
            error: None,
            calls: Mutex::new(0),
        }
    }

    /// Creates an exporter that always fails.
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::new()
        }
    }

    /// Number of `generate` calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

impl Default for FakeExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterExporter for FakeExporter {
    async fn generate(&self, request: &BundleRequest, bundle_dir: &Path) -> Result<String> {
        *self.calls.lock() += 1;
        if let Some(reason) = &self.error {
            return Err(BundleError::Exporter(reason.clone()));
        }
        let dir = bundle_dir.join("yamls").join("namespaced").join(&request.namespace);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("pods.yaml"), b"items: []\n").await?;
        Ok(self.file_name.clone())
    }
}

/// An event sink that keeps every event in order.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<BundleEvent>>,
}

impl RecordingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Event names in the order they were recorded.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    /// Events with the given name.
    #[must_use]
    pub fn of_kind(&self, kind: &str) -> Vec<BundleEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of events with the given name.
    #[must_use]
    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for RecordingEventSink {
    fn record(&self, event: BundleEvent) {
        self.events.lock().push(event);
    }
}
