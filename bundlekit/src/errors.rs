//! Error types for the bundle coordinator.
//!
//! Fatal errors stop the phase state machine and are recorded verbatim in the
//! manager status. Recoverable errors (validation, cleanup) are logged by the
//! caller and never abort a phase.

use std::collections::HashMap;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BundleError>;

/// The main error type for bundle collection.
#[derive(Debug, Error)]
pub enum BundleError {
    /// A required configuration value is missing or invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The bundle record is not in a state the manager can start from.
    #[error("invalid start state {state}")]
    InvalidState {
        /// The state found in the state store.
        state: String,
    },

    /// The node selector matched no nodes.
    #[error("no nodes are found for selector '{selector}'")]
    NoNodesMatched {
        /// The selector expression that was used.
        selector: String,
    },

    /// The orchestration API refused to create the agent workload.
    #[error("failed to schedule agents: {0}")]
    Schedule(String),

    /// An uploaded node bundle failed structural validation.
    #[error("invalid node bundle from {node}: {reason}")]
    Validation {
        /// The submitting node.
        node: String,
        /// Why the archive was rejected.
        reason: String,
    },

    /// Renaming or compressing the final bundle failed.
    #[error("fail to compress bundle: {0}")]
    Packaging(String),

    /// Tearing down the agent workload failed.
    #[error("fail to cleanup agent daemonset: {0}")]
    Cleanup(String),

    /// The run was cancelled by a shutdown signal.
    #[error("bundle collection cancelled: {0}")]
    Cancelled(String),

    /// The cluster-bundle exporter failed.
    #[error("fail to generate cluster bundle: {0}")]
    Exporter(String),

    /// A Kubernetes API call failed.
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BundleError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Creates a packaging error.
    #[must_use]
    pub fn packaging(reason: impl Into<String>) -> Self {
        Self::Packaging(reason.into())
    }

    /// Returns true if the error must stop the phase state machine.
    ///
    /// Validation and cleanup failures are logged and the run continues.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Validation { .. } | Self::Cleanup(_))
    }

    /// Returns a stable name for the error kind, used in emitted events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::InvalidState { .. } => "InvalidState",
            Self::NoNodesMatched { .. } => "NoNodesMatched",
            Self::Schedule(_) => "ScheduleError",
            Self::Validation { .. } => "ValidationError",
            Self::Packaging(_) => "PackagingError",
            Self::Cleanup(_) => "CleanupError",
            Self::Cancelled(_) => "Cancelled",
            Self::Exporter(_) => "ExporterError",
            Self::Kube(_) => "KubeError",
            Self::Io(_) => "IoError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("fatal".to_string(), serde_json::json!(self.is_fatal()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// A required manager input is missing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No namespace was given.
    #[error("namespace is not specified")]
    MissingNamespace,

    /// No bundle name was given.
    #[error("support bundle name is not specified")]
    MissingBundleName,

    /// The address agents report back to is unknown.
    #[error("manager pod IP is not specified")]
    MissingManagerAddress,

    /// No agent image was given.
    #[error("image name is not specified")]
    MissingImage,

    /// No image pull policy was given.
    #[error("image pull policy is not specified")]
    MissingPullPolicy,

    /// A value was present but could not be parsed.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// The configuration key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        let err: BundleError = ConfigError::MissingNamespace.into();
        assert_eq!(err.to_string(), "namespace is not specified");
        assert_eq!(err.kind(), "ConfigError");
    }

    #[test]
    fn test_recoverable_errors_are_not_fatal() {
        assert!(!BundleError::validation("node-a", "empty upload").is_fatal());
        assert!(!BundleError::Cleanup("forbidden".to_string()).is_fatal());
        assert!(BundleError::Schedule("denied".to_string()).is_fatal());
        assert!(BundleError::packaging("disk full").is_fatal());
    }

    #[test]
    fn test_no_nodes_matched_message() {
        let err = BundleError::NoNodesMatched {
            selector: "role=storage".to_string(),
        };
        assert!(err.to_string().contains("role=storage"));
    }

    #[test]
    fn test_error_to_dict() {
        let err = BundleError::validation("node-b", "not a gzip stream");
        let dict = err.to_dict();

        assert_eq!(dict.get("type").unwrap(), "ValidationError");
        assert_eq!(dict.get("fatal").unwrap(), false);
        assert!(dict
            .get("message")
            .unwrap()
            .as_str()
            .unwrap()
            .contains("node-b"));
    }
}
