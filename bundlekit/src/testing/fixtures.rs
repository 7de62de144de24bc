//! Archive and configuration fixtures.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tar::{Builder, Header};

use crate::config::ManagerConfig;
use crate::core::BundleRequest;

/// Namespace used by the fixtures.
pub const TEST_NAMESPACE: &str = "harvester-system";
/// Bundle name used by the fixtures.
pub const TEST_BUNDLE: &str = "bundle-test";

/// Builds a gzip tar holding `files` as regular files.
///
/// Panics if the in-memory archive cannot be written.
#[must_use]
pub fn node_bundle_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data) in files {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, *data)
            .expect("append to in-memory archive");
    }
    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .expect("finish in-memory archive")
}

/// A well-formed gzip tar with no entries.
#[must_use]
pub fn empty_archive() -> Vec<u8> {
    node_bundle_archive(&[])
}

/// A complete manager configuration writing under `output_dir` and
/// listening on an ephemeral loopback port.
#[must_use]
pub fn test_config(output_dir: &Path, wait_timeout: Duration) -> ManagerConfig {
    ManagerConfig::new()
        .with_namespace(TEST_NAMESPACE)
        .with_bundle_name(TEST_BUNDLE)
        .with_manager_pod_ip("127.0.0.1")
        .with_image("rancher/support-bundle-kit:test", "IfNotPresent")
        .with_output_dir(output_dir)
        .with_wait_timeout(wait_timeout)
        .with_listen_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
}

/// The request matching [`test_config`].
#[must_use]
pub fn test_request(wait_timeout: Duration) -> BundleRequest {
    BundleRequest::new(TEST_NAMESPACE, TEST_BUNDLE, wait_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use tar::Archive;

    #[test]
    fn test_archive_fixture_is_readable() {
        let bytes = node_bundle_archive(&[("a.log", b"a"), ("b/c.log", b"c")]);
        let mut archive = Archive::new(GzDecoder::new(&bytes[..]));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["a.log", "b/c.log"]);
    }

    #[test]
    fn test_config_fixture_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
        assert_eq!(config.working_dir(), dir.path().join("bundle"));
    }
}
