//! Ingestion endpoint.
//!
//! Agents `POST` their node bundle to `/v1/nodebundle/{node}`. A valid upload
//! is stored under `nodes/<node>.tar.gz` and completes the node in the
//! [`NodeSetTracker`](crate::tracker::NodeSetTracker); an invalid one is
//! answered with 400 and the node stays expected, so the agent may retry
//! within the wait window. Once the tracker is closed, uploads are answered
//! with `accepted: false` and nothing is written.

mod server;
mod store;

pub use server::{ingest_router, IngestError, IngestServer, IngestState, UploadResponse};
pub use store::{validate_node_name, NodeBundleStore, StagedBundle, MAX_NODE_NAME_LEN};
