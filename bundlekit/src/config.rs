//! Manager configuration.
//!
//! Values come from the environment of the manager pod (see [`ManagerConfig::from_env`])
//! or are assembled with the `with_*` builder methods in tests and embedders.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;

/// Environment variable names read by [`ManagerConfig::from_env`].
pub mod env {
    /// Namespace the bundle record lives in.
    pub const NAMESPACE: &str = "SUPPORT_BUNDLE_NAMESPACE";
    /// Name of the bundle record.
    pub const BUNDLE_NAME: &str = "SUPPORT_BUNDLE_NAME";
    /// IP of the manager pod, used to build the agent callback URL.
    pub const MANAGER_POD_IP: &str = "SUPPORT_BUNDLE_MANAGER_POD_IP";
    /// Agent container image.
    pub const IMAGE: &str = "SUPPORT_BUNDLE_IMAGE";
    /// Agent image pull policy.
    pub const IMAGE_PULL_POLICY: &str = "SUPPORT_BUNDLE_IMAGE_PULL_POLICY";
    /// Label selector restricting which nodes get an agent.
    pub const NODE_SELECTOR: &str = "SUPPORT_BUNDLE_NODE_SELECTOR";
    /// Directory the working tree and final archive are written to.
    pub const OUTPUT_DIR: &str = "SUPPORT_BUNDLE_OUTPUT_DIR";
    /// How long to wait for node bundles, in seconds.
    pub const WAIT_TIMEOUT: &str = "SUPPORT_BUNDLE_WAIT_TIMEOUT";
    /// Address the ingestion server listens on.
    pub const LISTEN_ADDR: &str = "SUPPORT_BUNDLE_LISTEN_ADDR";
    /// Issue URL copied into bundle metadata.
    pub const ISSUE_URL: &str = "SUPPORT_BUNDLE_ISSUE_URL";
    /// Issue description copied into bundle metadata.
    pub const DESCRIPTION: &str = "SUPPORT_BUNDLE_DESCRIPTION";
}

/// Configuration for one support bundle manager run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Namespace of the bundle record.
    #[serde(default)]
    pub namespace: String,
    /// Name of the bundle record.
    #[serde(default)]
    pub bundle_name: String,
    /// Address agents use to reach the manager.
    #[serde(default)]
    pub manager_pod_ip: String,
    /// Agent container image.
    #[serde(default)]
    pub image: String,
    /// Agent image pull policy (`Always`, `IfNotPresent`, `Never`).
    #[serde(default)]
    pub image_pull_policy: String,
    /// Node label selector, `key1=value1,key2=value2`.
    #[serde(default)]
    pub node_selector: String,
    /// Output directory. Empty means `<tmp>/support-bundle-kit`.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Wait timeout for node bundles in seconds.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_seconds: u64,
    /// Address the ingestion server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

fn default_wait_timeout() -> u64 {
    30 * 60
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            bundle_name: String::new(),
            manager_pod_ip: String::new(),
            image: String::new(),
            image_pull_policy: String::new(),
            node_selector: String::new(),
            output_dir: None,
            wait_timeout_seconds: default_wait_timeout(),
            listen_addr: default_listen_addr(),
        }
    }
}

impl ManagerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the bundle name.
    #[must_use]
    pub fn with_bundle_name(mut self, name: impl Into<String>) -> Self {
        self.bundle_name = name.into();
        self
    }

    /// Sets the manager pod IP.
    #[must_use]
    pub fn with_manager_pod_ip(mut self, ip: impl Into<String>) -> Self {
        self.manager_pod_ip = ip.into();
        self
    }

    /// Sets the agent image and pull policy.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>, pull_policy: impl Into<String>) -> Self {
        self.image = image.into();
        self.image_pull_policy = pull_policy.into();
        self
    }

    /// Sets the node selector.
    #[must_use]
    pub fn with_node_selector(mut self, selector: impl Into<String>) -> Self {
        self.node_selector = selector.into();
        self
    }

    /// Sets the output directory.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Sets the wait timeout.
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_seconds = timeout.as_secs();
        self
    }

    /// Sets the listen address.
    #[must_use]
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Loads the configuration from `SUPPORT_BUNDLE_*` environment variables.
    ///
    /// Missing variables keep their defaults; [`validate`](Self::validate)
    /// reports the ones that are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).unwrap_or_default();
        let mut config = Self {
            namespace: get(env::NAMESPACE),
            bundle_name: get(env::BUNDLE_NAME),
            manager_pod_ip: get(env::MANAGER_POD_IP),
            image: get(env::IMAGE),
            image_pull_policy: get(env::IMAGE_PULL_POLICY),
            node_selector: get(env::NODE_SELECTOR),
            ..Self::default()
        };

        let output_dir = get(env::OUTPUT_DIR);
        if !output_dir.is_empty() {
            config.output_dir = Some(PathBuf::from(output_dir));
        }

        let timeout = get(env::WAIT_TIMEOUT);
        if !timeout.is_empty() {
            config.wait_timeout_seconds = timeout
                .parse()
                .map_err(|e| ConfigError::invalid(env::WAIT_TIMEOUT, format!("{e}")))?;
        }

        let listen = get(env::LISTEN_ADDR);
        if !listen.is_empty() {
            config.listen_addr = listen
                .parse()
                .map_err(|e| ConfigError::invalid(env::LISTEN_ADDR, format!("{e}")))?;
        }

        Ok(config)
    }

    /// Checks that every required input is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::MissingNamespace);
        }
        if self.bundle_name.is_empty() {
            return Err(ConfigError::MissingBundleName);
        }
        if self.manager_pod_ip.is_empty() {
            return Err(ConfigError::MissingManagerAddress);
        }
        if self.image.is_empty() {
            return Err(ConfigError::MissingImage);
        }
        if self.image_pull_policy.is_empty() {
            return Err(ConfigError::MissingPullPolicy);
        }
        Ok(())
    }

    /// Returns the output directory, falling back to `<tmp>/support-bundle-kit`.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("support-bundle-kit"))
    }

    /// Returns the working directory the cluster and node bundles are written into.
    #[must_use]
    pub fn working_dir(&self) -> PathBuf {
        working_dir_in(&self.output_dir())
    }

    /// Returns the directory uploads are streamed into before they are accepted.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        staging_dir_in(&self.output_dir())
    }

    /// Gets the wait timeout as a Duration.
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_seconds)
    }

    /// The URL agents post their node bundles to.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("http://{}:{}", self.manager_pod_ip, self.listen_addr.port())
    }
}

/// The working directory under an output directory.
#[must_use]
pub fn working_dir_in(output_dir: &Path) -> PathBuf {
    output_dir.join("bundle")
}

/// The upload staging directory under an output directory. It sits outside the
/// working tree so the packager never sees an upload in flight.
#[must_use]
pub fn staging_dir_in(output_dir: &Path) -> PathBuf {
    output_dir.join(".incoming")
}
