//! Directory traversal and tree copying.
//!
//! Walking prunes ignored directories up front, so nothing beneath them is
//! ever stat'ed. Copying records per-file failures instead of stopping.

use super::ignore::GitignoreFilter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Paths (relative to the root) matching this filter are skipped
    pub filter: GitignoreFilter,
}

impl WalkOptions {
    pub fn with_filter(filter: GitignoreFilter) -> Self {
        Self { filter }
    }
}

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,
}

/// Outcome of copying one tree onto another.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopyReport {
    pub files: usize,
    pub bytes: u64,
    pub errors: Vec<String>,
}

fn is_excluded(entry: &DirEntry, root: &Path, filter: &GitignoreFilter) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    match entry.path().strip_prefix(root) {
        Ok(rel) => filter.is_ignored(rel, entry.file_type().is_dir()),
        Err(_) => false,
    }
}

/// Walk a directory tree and collect all regular files that pass the filter.
///
/// # Example
/// ```no_run
/// use backup_engine::fs::walker::{walk_directory, WalkOptions};
/// use std::path::Path;
///
/// let files = walk_directory(Path::new("/data"), &WalkOptions::default()).unwrap();
/// println!("Found {} files", files.len());
/// ```
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    let entries = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_excluded(e, root, &options.filter));

    for entry in entries {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        files.push(FileInfo {
            size: entry.metadata()?.len(),
            path,
            relative_path,
        });
    }

    Ok(files)
}

/// Count files in a directory (fast, without collecting)
pub fn count_files(root: &Path, options: &WalkOptions) -> std::io::Result<usize> {
    let mut count = 0;
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_excluded(e, root, &options.filter))
    {
        if entry?.file_type().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

/// Calculate total size of all files in a directory
pub fn calculate_total_size(root: &Path, options: &WalkOptions) -> std::io::Result<u64> {
    Ok(walk_directory(root, options)?.iter().map(|f| f.size).sum())
}

/// Copy every file under `from` that passes the filter into `to`, keeping
/// relative paths. Existing files in `to` that are not in `from` are left alone.
///
/// Fails outright only when `from` is not a directory; anything else that
/// goes wrong is appended to the report's `errors`.
pub fn copy_tree(from: &Path, to: &Path, options: &WalkOptions) -> std::io::Result<CopyReport> {
    if !from.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("source directory not found: {}", from.display()),
        ));
    }
    fs::create_dir_all(to)?;

    let mut report = CopyReport::default();

    let entries = WalkDir::new(from)
        .into_iter()
        .filter_entry(|e| !is_excluded(e, from, &options.filter));

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Walk error under {}: {}", from.display(), e);
                report.errors.push(e.to_string());
                continue;
            }
        };

        let rel = match entry.path().strip_prefix(from) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let dest = to.join(rel);

        if entry.file_type().is_dir() {
            if let Err(e) = fs::create_dir_all(&dest) {
                report.errors.push(format!("{}: {}", rel.display(), e));
            }
        } else if entry.file_type().is_file() {
            let copied = dest
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|_| fs::copy(entry.path(), &dest));
            match copied {
                Ok(bytes) => {
                    report.files += 1;
                    report.bytes += bytes;
                }
                Err(e) => {
                    warn!("Failed to copy {}: {}", entry.path().display(), e);
                    report.errors.push(format!("{}: {}", rel.display(), e));
                }
            }
        } else {
            debug!("Skipping non-regular entry {}", entry.path().display());
        }
    }

    Ok(report)
}
