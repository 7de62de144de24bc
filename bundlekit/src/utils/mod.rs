//! Utility functions for timestamps, bundle naming and checksums.

pub mod timestamps;

pub use timestamps::{format_rfc3339, now_rfc3339, Timestamp};

use sha2::{Digest, Sha256};
use std::io::{self, Read};
use std::path::Path;

/// Extension of every archive the coordinator reads or writes.
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Builds the final archive name from the namespace UID and creation time.
///
/// Colons are not portable in file names, so they become dashes.
#[must_use]
pub fn bundle_file_name(namespace_uid: &str, created_at: &str) -> String {
    format!(
        "supportbundle_{}_{}.{ARCHIVE_EXTENSION}",
        namespace_uid,
        created_at.replace(':', "-")
    )
}

/// Strips the archive extension from a bundle file name.
#[must_use]
pub fn bundle_stem(file_name: &str) -> &str {
    file_name
        .strip_suffix(ARCHIVE_EXTENSION)
        .and_then(|s| s.strip_suffix('.'))
        .unwrap_or(file_name)
}

/// Computes the hex-encoded SHA-256 of a file.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
