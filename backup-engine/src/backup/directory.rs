//! Filesystem component backup.

use super::manifest::{bytes_to_mb, DirectoryResult};
use crate::fs::{copy_tree, GitignoreFilter, WalkOptions};
use std::path::Path;
use tracing::{info, warn};

/// Copy `source` into `<dest_root>/<name>`.
///
/// Paths `filter` ignores are skipped. Per-file failures are recorded in
/// `errors` and the copy carries on; only a missing source aborts.
pub fn backup_directory(source: &Path, dest_root: &Path, name: &str, filter: GitignoreFilter) -> DirectoryResult {
    let backup_dir = dest_root.join(name);

    if !source.is_dir() {
        warn!(component = %name, "Source directory not found: {}", source.display());
        return DirectoryResult::failed(
            name,
            source,
            &backup_dir,
            format!("source directory not found: {}", source.display()),
        );
    }

    info!(
        component = %name,
        filtered = !filter.is_empty(),
        "Copying {} -> {}",
        source.display(),
        backup_dir.display()
    );

    match copy_tree(source, &backup_dir, &WalkOptions::with_filter(filter)) {
        Ok(report) => {
            if !report.errors.is_empty() {
                warn!(component = %name, failures = report.errors.len(), "Directory backup finished with errors");
            }
            info!(component = %name, files = report.files, bytes = report.bytes, "Directory backup complete");
            DirectoryResult {
                component: name.to_string(),
                source_dir: source.to_path_buf(),
                backup_dir,
                files: report.files,
                size_mb: bytes_to_mb(report.bytes),
                errors: report.errors,
            }
        }
        Err(e) => DirectoryResult::failed(name, source, &backup_dir, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn filter(always_include: &[&str]) -> GitignoreFilter {
        GitignoreFilter::new(&["*.pt", "__pycache__/"], always_include)
    }

    fn seed(dir: &Path) {
        fs::create_dir_all(dir.join("__pycache__")).unwrap();
        fs::write(dir.join("weights.pt"), b"binary weights").unwrap();
        fs::write(dir.join("__pycache__/x.pyc"), b"cache").unwrap();
        fs::write(dir.join("settings.yaml"), b"lr: 0.1").unwrap();
    }

    #[test]
    fn test_filtered_copy_skips_ignored() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        seed(src.path());

        let result = backup_directory(src.path(), dst.path(), "config", filter(&[]));
        assert!(result.errors.is_empty());
        assert_eq!(result.files, 1);
        assert!(dst.path().join("config/settings.yaml").exists());
        assert!(!dst.path().join("config/weights.pt").exists());
        assert!(!dst.path().join("config/__pycache__").exists());
    }

    #[test]
    fn test_unfiltered_copy_keeps_ignored_files() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        seed(src.path());

        let result = backup_directory(src.path(), dst.path(), "models", GitignoreFilter::empty());
        assert_eq!(result.files, 3);
        assert_eq!(fs::read(dst.path().join("models/weights.pt")).unwrap(), b"binary weights");
    }

    #[test]
    fn test_always_include_survives_filter() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("release")).unwrap();
        fs::write(src.path().join("release/final.pt"), b"keep").unwrap();
        fs::write(src.path().join("scratch.pt"), b"drop").unwrap();

        let result = backup_directory(src.path(), dst.path(), "outputs", filter(&["release"]));
        assert_eq!(result.files, 1);
        assert!(dst.path().join("outputs/release/final.pt").exists());
        assert!(!dst.path().join("outputs/scratch.pt").exists());
    }

    #[test]
    fn test_missing_source_fails_component() {
        let dst = TempDir::new().unwrap();
        let result = backup_directory(
            Path::new("/nonexistent/outputs"),
            dst.path(),
            "outputs",
            GitignoreFilter::empty(),
        );
        assert_eq!(result.files, 0);
        assert_eq!(result.size_mb, 0.0);
        assert_eq!(result.errors.len(), 1);
        assert!(!dst.path().join("outputs").exists());
    }
}
