//! Bundle record state store.
//!
//! The record is owned by an external controller. The manager reads the
//! request and its state at start, and writes the final outcome.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::core::{BundleRequest, BundleState};
use crate::errors::{BundleError, Result};

/// A stored bundle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRecord {
    /// The request as created by the controller.
    pub request: BundleRequest,
    /// Current state.
    pub state: BundleState,
    /// Final archive name, once ready.
    #[serde(default)]
    pub filename: Option<String>,
    /// Final archive size, once ready.
    #[serde(default)]
    pub filesize: Option<u64>,
    /// Error message, if the run failed.
    #[serde(default)]
    pub error: Option<String>,
}

impl BundleRecord {
    /// Creates a record in the `Generating` state.
    #[must_use]
    pub fn generating(request: BundleRequest) -> Self {
        Self {
            request,
            state: BundleState::Generating,
            filename: None,
            filesize: None,
            error: None,
        }
    }
}

/// Key-value access to bundle records keyed by (namespace, name).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads the request.
    async fn get_request(&self, namespace: &str, name: &str) -> Result<BundleRequest>;

    /// Reads the current state.
    async fn get_state(&self, namespace: &str, name: &str) -> Result<BundleState>;

    /// Marks the bundle ready for download.
    async fn set_ready(&self, namespace: &str, name: &str, filename: &str, size: u64)
        -> Result<()>;

    /// Marks the bundle as failed.
    async fn set_error(&self, namespace: &str, name: &str, message: &str) -> Result<()>;
}

/// In-memory state store.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    records: DashMap<(String, String), BundleRecord>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding one record in the `Generating` state.
    #[must_use]
    pub fn seeded(request: BundleRequest) -> Self {
        let store = Self::new();
        store.insert(BundleRecord::generating(request));
        store
    }

    /// Inserts or replaces a record.
    pub fn insert(&self, record: BundleRecord) {
        let key = (record.request.namespace.clone(), record.request.name.clone());
        self.records.insert(key, record);
    }

    /// Returns a copy of a record.
    #[must_use]
    pub fn record(&self, namespace: &str, name: &str) -> Option<BundleRecord> {
        self.records
            .get(&(namespace.to_string(), name.to_string()))
            .map(|r| r.clone())
    }

    fn update<F>(&self, namespace: &str, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut BundleRecord),
    {
        let mut record = self
            .records
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| not_found(namespace, name))?;
        f(&mut record);
        Ok(())
    }
}

fn not_found(namespace: &str, name: &str) -> BundleError {
    BundleError::Internal(format!("support bundle {namespace}/{name} not found"))
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_request(&self, namespace: &str, name: &str) -> Result<BundleRequest> {
        self.record(namespace, name)
            .map(|r| r.request)
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn get_state(&self, namespace: &str, name: &str) -> Result<BundleState> {
        self.record(namespace, name)
            .map(|r| r.state)
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn set_ready(
        &self,
        namespace: &str,
        name: &str,
        filename: &str,
        size: u64,
    ) -> Result<()> {
        self.update(namespace, name, |record| {
            record.state = BundleState::Ready;
            record.filename = Some(filename.to_string());
            record.filesize = Some(size);
        })
    }

    async fn set_error(&self, namespace: &str, name: &str, message: &str) -> Result<()> {
        self.update(namespace, name, |record| {
            record.state = BundleState::Error;
            record.error = Some(message.to_string());
        })
    }
}
