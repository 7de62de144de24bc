//! Core domain model types.
//!
//! - Manager phase and status
//! - The bundle request record
//! - Accepted node bundle artifacts

mod artifact;
mod request;
mod status;

pub use artifact::NodeBundleArtifact;
pub use request::{BundleRequest, BundleState};
pub use status::{ManagerPhase, ManagerStatus, StatusTracker};
