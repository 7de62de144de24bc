//! Accepted node bundle record.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A node bundle that passed validation and was stored in the working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBundleArtifact {
    /// The node that uploaded it.
    pub node: String,
    /// Where it was stored.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Hex-encoded SHA-256 of the archive.
    pub sha256: String,
    /// Number of entries in the archive.
    pub entries: usize,
    /// When it was accepted (RFC 3339).
    pub received_at: String,
}
