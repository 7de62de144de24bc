//! # Bundlekit
//!
//! Node bundle collection for Kubernetes support bundles.
//!
//! A support bundle manager runs as a pod in the cluster and:
//!
//! - **Exports cluster state**: writes the cluster-bundle tree through a [`cluster::ClusterExporter`]
//! - **Fans out agents**: creates one agent per matching node as a DaemonSet
//! - **Collects node bundles**: agents upload a gzip tar to the manager's HTTP endpoint
//! - **Tolerates partial failure**: a node that never reports is left out when the wait times out
//! - **Packages**: the working tree is compressed into one downloadable archive
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bundlekit::prelude::*;
//!
//! let config = ManagerConfig::from_env()?;
//! let cluster: Arc<dyn ClusterApi> = Arc::new(KubeClusterApi::try_default().await?);
//! let exporter = Arc::new(MetadataExporter::new(Arc::clone(&cluster), "Harvester"));
//! let manager = SupportBundleManager::new(config, cluster, state_store, exporter);
//!
//! manager.run().await?;
//! manager.serve_until_cancelled().await;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod agents;
pub mod cancellation;
pub mod cluster;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod ingest;
pub mod manager;
pub mod packager;
pub mod state;
pub mod testing;
pub mod tracker;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::agents::{AgentFanout, AgentWorkloadDescriptor, WorkloadHandle};
    pub use crate::cancellation::CancellationToken;
    pub use crate::cluster::{ClusterApi, ClusterExporter, KubeClusterApi, MetadataExporter};
    pub use crate::config::ManagerConfig;
    pub use crate::core::{
        BundleRequest, BundleState, ManagerPhase, ManagerStatus, NodeBundleArtifact,
        StatusTracker,
    };
    pub use crate::errors::{BundleError, ConfigError, Result};
    pub use crate::events::{BundleEvent, EventSink, LoggingEventSink};
    pub use crate::ingest::{ingest_router, IngestServer, NodeBundleStore};
    pub use crate::manager::SupportBundleManager;
    pub use crate::packager::{BundlePackager, PackagedBundle};
    pub use crate::state::{InMemoryStateStore, StateStore};
    pub use crate::tracker::{NodeSetTracker, WaitOutcome};
    pub use std::sync::Arc;
}
