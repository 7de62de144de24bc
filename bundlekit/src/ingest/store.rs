//! Node bundle storage.
//!
//! An upload is streamed to a unique `.partial` file in a staging directory
//! outside the working tree, checked, and only then renamed into
//! `nodes/<node>.tar.gz`. Nothing under the final name is ever half-written,
//! and nothing in the working tree is unchecked.

use axum::body::Body;
use flate2::read::GzDecoder;
use futures::TryStreamExt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tar::Archive;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::NodeBundleArtifact;
use crate::errors::{BundleError, Result};
use crate::utils::{now_rfc3339, sha256_file, ARCHIVE_EXTENSION};

/// Maximum length of a node name (DNS-1123 subdomain).
pub const MAX_NODE_NAME_LEN: usize = 253;

/// Writes accepted node bundles under `<working>/nodes/`.
#[derive(Debug, Clone)]
pub struct NodeBundleStore {
    nodes_dir: PathBuf,
    staging_dir: PathBuf,
}

/// A validated upload waiting in the staging directory.
#[derive(Debug)]
pub struct StagedBundle {
    node: String,
    partial: PathBuf,
    size: u64,
    sha256: String,
    entries: usize,
}

impl StagedBundle {
    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl NodeBundleStore {
    /// Creates a store writing into `<working_dir>/nodes` and staging in `staging_dir`.
    #[must_use]
    pub fn new(working_dir: &Path, staging_dir: &Path) -> Self {
        Self {
            nodes_dir: working_dir.join("nodes"),
            staging_dir: staging_dir.to_path_buf(),
        }
    }

    /// Directory holding the node bundles.
    #[must_use]
    pub fn nodes_dir(&self) -> &Path {
        &self.nodes_dir
    }

    /// Directory holding uploads in flight.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Final location of a node's bundle.
    #[must_use]
    pub fn bundle_path(&self, node: &str) -> PathBuf {
        self.nodes_dir.join(format!("{node}.{ARCHIVE_EXTENSION}"))
    }

    /// Streams `body` into the staging directory and validates it.
    ///
    /// Returns [`BundleError::Validation`] for a bad node name or a malformed
    /// archive, and [`BundleError::Io`] when the body cannot be stored. In
    /// both cases nothing is left behind.
    pub async fn stage(&self, node: &str, body: Body) -> Result<StagedBundle> {
        validate_node_name(node)?;

        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let partial = self
            .staging_dir
            .join(format!(".{node}.{}.partial", Uuid::new_v4()));

        if let Err(e) = write_body(&partial, body).await {
            warn!(node = %node, error = %e, "fail to receive node bundle");
            remove_partial(&partial).await;
            return Err(e.into());
        }

        let checked = partial.clone();
        let inspected = tokio::task::spawn_blocking(move || inspect(&checked))
            .await
            .map_err(|e| BundleError::Internal(format!("validation task failed: {e}")))?;

        match inspected {
            Ok((entries, size, sha256)) => Ok(StagedBundle {
                node: node.to_string(),
                partial,
                size,
                sha256,
                entries,
            }),
            Err(reason) => {
                remove_partial(&partial).await;
                Err(BundleError::validation(node, reason))
            }
        }
    }

    /// Moves a staged bundle to its final name in the working tree.
    ///
    /// Synchronous so the caller can run it while holding the node set lock.
    pub fn commit(&self, staged: &StagedBundle) -> Result<NodeBundleArtifact> {
        let target = self.bundle_path(&staged.node);
        let moved = std::fs::create_dir_all(&self.nodes_dir)
            .and_then(|()| std::fs::rename(&staged.partial, &target));
        if let Err(e) = moved {
            if let Err(rm) = std::fs::remove_file(&staged.partial) {
                if rm.kind() != io::ErrorKind::NotFound {
                    warn!(
                        path = %staged.partial.display(),
                        error = %rm,
                        "fail to remove partial node bundle"
                    );
                }
            }
            return Err(e.into());
        }
        debug!(
            node = %staged.node,
            path = %target.display(),
            size = staged.size,
            entries = staged.entries,
            "stored node bundle"
        );

        Ok(NodeBundleArtifact {
            node: staged.node.clone(),
            path: target,
            size: staged.size,
            sha256: staged.sha256.clone(),
            entries: staged.entries,
            received_at: now_rfc3339(),
        })
    }

    /// Drops a staged bundle that will not be committed.
    pub async fn discard(&self, staged: StagedBundle) {
        remove_partial(&staged.partial).await;
    }
}

/// Checks that `node` is a DNS-1123 subdomain name.
pub fn validate_node_name(node: &str) -> Result<()> {
    if node.is_empty() || node.len() > MAX_NODE_NAME_LEN {
        return Err(BundleError::validation(
            node,
            format!("node name must be 1-{MAX_NODE_NAME_LEN} characters"),
        ));
    }

    let label_ok = |label: &str| {
        let bytes = label.as_bytes();
        !bytes.is_empty()
            && bytes[0].is_ascii_alphanumeric()
            && bytes[bytes.len() - 1].is_ascii_alphanumeric()
            && bytes
                .iter()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
    };

    if node.split('.').all(label_ok) {
        Ok(())
    } else {
        Err(BundleError::validation(
            node,
            "node name must be a lowercase DNS-1123 subdomain",
        ))
    }
}

async fn write_body(path: &Path, body: Body) -> io::Result<()> {
    let stream = body.into_data_stream().map_err(io::Error::other);
    let reader = StreamReader::new(stream);
    let mut reader = std::pin::pin!(reader);

    let file = tokio::fs::File::create(path).await?;
    let mut writer = BufWriter::new(file);
    tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await?;
    Ok(())
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "fail to remove partial node bundle");
        }
    }
}

/// Reads the whole archive. Returns (entries, size, sha256) or a rejection reason.
fn inspect(path: &Path) -> std::result::Result<(usize, u64, String), String> {
    let size = std::fs::metadata(path).map_err(|e| e.to_string())?.len();
    if size == 0 {
        return Err("empty node bundle".to_string());
    }

    let file = File::open(path).map_err(|e| e.to_string())?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    let mut entries = 0;
    {
        let mut archive = Archive::new(&mut decoder);
        let iter = archive
            .entries()
            .map_err(|e| format!("not a tar archive: {e}"))?;
        for entry in iter {
            let mut entry = entry.map_err(|e| format!("corrupt archive entry: {e}"))?;
            io::copy(&mut entry, &mut io::sink())
                .map_err(|e| format!("corrupt archive entry: {e}"))?;
            entries += 1;
        }
    }
    // Drain the rest so the gzip trailer checksum is verified.
    io::copy(&mut decoder, &mut io::sink()).map_err(|e| format!("corrupt gzip stream: {e}"))?;

    if entries == 0 {
        return Err("node bundle has no entries".to_string());
    }

    let sha256 = sha256_file(path).map_err(|e| e.to_string())?;
    Ok((entries, size, sha256))
}
