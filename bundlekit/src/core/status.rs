//! Manager phase and status.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A phase of the support bundle manager lifecycle.
///
/// Phases run in declaration order; see [`ManagerPhase::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerPhase {
    /// Validate inputs and start the ingestion server.
    Init,
    /// Export cluster-scope and namespaced state.
    ClusterBundle,
    /// Fan out agents and collect node bundles.
    NodeBundle,
    /// Compress the working tree into the final archive.
    Packaging,
    /// The archive is ready to download.
    Done,
}

impl ManagerPhase {
    /// Every phase, in execution order.
    pub const ALL: [Self; 5] = [
        Self::Init,
        Self::ClusterBundle,
        Self::NodeBundle,
        Self::Packaging,
        Self::Done,
    ];

    /// The phase name as reported in status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::ClusterBundle => "clusterbundle",
            Self::NodeBundle => "nodebundle",
            Self::Packaging => "packaging",
            Self::Done => "done",
        }
    }
}

impl Default for ManagerPhase {
    fn default() -> Self {
        Self::Init
    }
}

impl fmt::Display for ManagerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the manager's progress, served on the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStatus {
    /// The phase currently running, or the last one that ran.
    pub phase: ManagerPhase,
    /// Progress percentage, 0..=100.
    pub progress: u8,
    /// Set to true once an error has been recorded.
    pub error: bool,
    /// The recorded error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// File name of the final archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Size of the final archive in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
}

impl ManagerStatus {
    /// Returns true once the run has finished, successfully or not.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.error || (self.phase == ManagerPhase::Done && self.progress == 100)
    }
}

/// Shared, thread-safe holder of the [`ManagerStatus`].
///
/// Only the phase state machine writes; the status endpoint reads snapshots.
/// Once terminal, further updates are ignored.
#[derive(Debug, Default)]
pub struct StatusTracker {
    inner: RwLock<ManagerStatus>,
}

impl StatusTracker {
    /// Creates a tracker in the `Init` phase with zero progress.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current status.
    #[must_use]
    pub fn snapshot(&self) -> ManagerStatus {
        self.inner.read().clone()
    }

    /// Moves to a new phase.
    pub fn set_phase(&self, phase: ManagerPhase) {
        let mut status = self.inner.write();
        if status.is_terminal() {
            return;
        }
        status.phase = phase;
    }

    /// Raises progress. Lower values than the current one are ignored.
    pub fn set_progress(&self, progress: u8) {
        let mut status = self.inner.write();
        if status.error {
            return;
        }
        status.progress = status.progress.max(progress.min(100));
    }

    /// Records the first error. Later errors are ignored.
    pub fn set_error(&self, message: impl Into<String>) {
        let mut status = self.inner.write();
        if status.error {
            return;
        }
        status.error = true;
        status.error_message = Some(message.into());
    }

    /// Records the final archive.
    pub fn set_file_info(&self, filename: impl Into<String>, size: u64) {
        let mut status = self.inner.write();
        status.filename = Some(filename.into());
        status.filesize = Some(size);
    }
}
