//! Directory restore: overlay the backed-up tree onto the live target.
//! Files that exist only in the target are left alone.

use super::ComponentOutcome;
use crate::backup::manifest::{ComponentKind, DirectoryResult};
use crate::fs::walker::{calculate_total_size, count_files, copy_tree, WalkOptions};
use std::path::{Path, PathBuf};
use tracing::info;

/// Backed-up tree of `component`. Prefers `<run_dir>/<component>` so a
/// relocated backup still restores; falls back to the recorded path.
pub fn backup_source(run_dir: &Path, component: &str, result: &DirectoryResult) -> PathBuf {
    let local = run_dir.join(component);
    if local.is_dir() || result.backup_dir.as_os_str().is_empty() {
        local
    } else {
        result.backup_dir.clone()
    }
}

pub fn restore_directory(component: &str, source: &Path, target: &Path, dry_run: bool) -> ComponentOutcome {
    if !source.is_dir() {
        return ComponentOutcome::failed(
            ComponentKind::Directory,
            format!("backup directory not found: {}", source.display()),
        );
    }

    let options = WalkOptions::default();
    if dry_run {
        let files = count_files(source, &options).unwrap_or(0);
        let bytes = calculate_total_size(source, &options).unwrap_or(0);
        return ComponentOutcome::ok(
            ComponentKind::Directory,
            format!("would restore {} files ({} bytes) into {}", files, bytes, target.display()),
        );
    }

    info!(component, "Restoring {} onto {}", source.display(), target.display());
    let report = match copy_tree(source, target, &options) {
        Ok(report) => report,
        Err(e) => {
            return ComponentOutcome::failed(
                ComponentKind::Directory,
                format!("restore into {} failed: {}", target.display(), e),
            )
        }
    };

    if report.errors.is_empty() {
        ComponentOutcome::ok(
            ComponentKind::Directory,
            format!("restored {} files ({} bytes) into {}", report.files, report.bytes, target.display()),
        )
    } else {
        let mut outcome = ComponentOutcome::failed(
            ComponentKind::Directory,
            format!(
                "{} of {} files failed to restore into {}",
                report.errors.len(),
                report.files + report.errors.len(),
                target.display()
            ),
        );
        outcome.warnings = report.errors;
        outcome
    }
}
