//! Bundle packager.
//!
//! Renames the working tree to a stable directory named after the bundle and
//! compresses it into one gzip tar next to it. Entries are written in sorted
//! path order, so the same tree always yields the same file listing. Upload
//! temp files (`*.partial`) are never archived, and a failed write leaves no
//! archive behind.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tar::Builder;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::errors::{BundleError, Result};
use crate::utils::bundle_stem;

/// The packaged archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedBundle {
    /// Archive file name.
    pub name: String,
    /// Full path of the archive.
    pub path: PathBuf,
    /// Archive size in bytes.
    pub size: u64,
}

/// Packages a working tree into the final archive.
#[derive(Debug, Clone, Default)]
pub struct BundlePackager;

impl BundlePackager {
    /// Creates a packager.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Moves `working_dir` to `<output_dir>/<stem>` and writes
    /// `<output_dir>/<file_name>`, with every entry under `<stem>/`.
    pub fn package(
        &self,
        working_dir: &Path,
        output_dir: &Path,
        file_name: &str,
    ) -> Result<PackagedBundle> {
        let stem = bundle_stem(file_name);
        let bundle_dir = output_dir.join(stem);
        let archive_path = output_dir.join(file_name);

        std::fs::rename(working_dir, &bundle_dir).map_err(|e| {
            BundleError::packaging(format!(
                "rename {} -> {}: {e}",
                working_dir.display(),
                bundle_dir.display()
            ))
        })?;

        let written = write_archive(&bundle_dir, stem, &archive_path)
            .and_then(|entries| Ok((entries, std::fs::metadata(&archive_path)?.len())));
        let (entries, size) = match written {
            Ok(written) => written,
            Err(e) => {
                remove_archive(&archive_path);
                return Err(BundleError::packaging(format!(
                    "{}: {e}",
                    archive_path.display()
                )));
            }
        };

        info!(
            archive = %archive_path.display(),
            entries,
            size,
            "packaged support bundle"
        );

        Ok(PackagedBundle {
            name: file_name.to_string(),
            path: archive_path,
            size,
        })
    }

    /// Async wrapper running [`package`](Self::package) on the blocking pool.
    pub async fn package_async(
        &self,
        working_dir: PathBuf,
        output_dir: PathBuf,
        file_name: String,
    ) -> Result<PackagedBundle> {
        let packager = self.clone();
        tokio::task::spawn_blocking(move || packager.package(&working_dir, &output_dir, &file_name))
            .await
            .map_err(|e| BundleError::packaging(format!("packaging task failed: {e}")))?
    }
}

/// Writes `source` into a gzip tar at `archive_path`, rooted at `prefix/`.
/// Returns the number of entries written.
fn write_archive(source: &Path, prefix: &str, archive_path: &Path) -> std::io::Result<usize> {
    let file = File::create(archive_path)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut entries = 0;
    let walk = WalkDir::new(source)
        .sort_by_file_name()
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_partial_upload(entry));
    for entry in walk {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = match entry.path().strip_prefix(source) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let name = Path::new(prefix).join(relative);

        if entry.file_type().is_dir() {
            builder.append_dir(&name, entry.path())?;
        } else {
            debug!(path = %name.display(), "adding to bundle");
            builder.append_path_with_name(entry.path(), &name)?;
        }
        entries += 1;
    }

    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    Ok(entries)
}

fn is_partial_upload(entry: &DirEntry) -> bool {
    !entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(".partial"))
}

fn remove_archive(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => warn!(archive = %path.display(), "removed incomplete support bundle"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            archive = %path.display(),
            error = %e,
            "fail to remove incomplete support bundle"
        ),
    }
}
