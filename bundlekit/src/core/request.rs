//! The bundle request record and its state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// State of a bundle record in the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleState {
    /// The manager is (or should be) producing the bundle.
    Generating,
    /// The bundle has been produced and can be downloaded.
    Ready,
    /// The run failed.
    Error,
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generating => write!(f, "generating"),
            Self::Ready => write!(f, "ready"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A request for a support bundle, created by an external controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRequest {
    /// Namespace the request lives in.
    pub namespace: String,
    /// Bundle name.
    pub name: String,
    /// Node label selector expression.
    #[serde(default)]
    pub node_selector: String,
    /// How long to wait for node bundles, in seconds.
    pub timeout_seconds: u64,
    /// Issue the bundle is attached to.
    #[serde(default)]
    pub issue_url: Option<String>,
    /// Free-form description of the problem.
    #[serde(default)]
    pub description: Option<String>,
}

impl BundleRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            node_selector: String::new(),
            timeout_seconds: timeout.as_secs(),
            issue_url: None,
            description: None,
        }
    }

    /// Sets the node selector.
    #[must_use]
    pub fn with_node_selector(mut self, selector: impl Into<String>) -> Self {
        self.node_selector = selector.into();
        self
    }

    /// Sets the issue URL.
    #[must_use]
    pub fn with_issue_url(mut self, url: impl Into<String>) -> Self {
        self.issue_url = Some(url.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The wait timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
