//! Integrity checks: checksums, dump sanity, manifest validation, and
//! post-backup critical file pattern checks.

pub mod checksum;
pub mod dump;
pub mod manifest;

use crate::fs::walker::{walk_directory, WalkOptions};
use globset::{GlobBuilder, GlobSetBuilder};
use std::path::Path;

pub use checksum::sha256_file;
pub use dump::validate_dump_artifact;
pub use manifest::validate_manifest;

/// Check that every pattern matches at least one file under `backup_dir`.
/// Returns one message per pattern that matched nothing or failed to parse.
pub fn check_critical_patterns(component: &str, backup_dir: &Path, patterns: &[String]) -> Vec<String> {
    if patterns.is_empty() {
        return Vec::new();
    }

    let mut problems = Vec::new();
    let mut builder = GlobSetBuilder::new();
    let mut compiled = Vec::new();
    for pattern in patterns {
        match GlobBuilder::new(pattern).literal_separator(true).build() {
            Ok(glob) => {
                builder.add(glob);
                compiled.push(pattern);
            }
            Err(e) => problems.push(format!("{}: invalid critical pattern {:?}: {}", component, pattern, e)),
        }
    }
    let set = match builder.build() {
        Ok(set) => set,
        Err(e) => {
            problems.push(format!("{}: critical patterns failed to build: {}", component, e));
            return problems;
        }
    };

    let files = match walk_directory(backup_dir, &WalkOptions::default()) {
        Ok(files) => files,
        Err(e) => {
            problems.push(format!("{}: cannot scan {}: {}", component, backup_dir.display(), e));
            return problems;
        }
    };

    let mut hits = vec![false; compiled.len()];
    for file in &files {
        for idx in set.matches(&file.relative_path) {
            hits[idx] = true;
        }
    }

    for (pattern, hit) in compiled.iter().zip(hits) {
        if !hit {
            problems.push(format!(
                "{}: no files matching critical pattern {:?} in {}",
                component,
                pattern,
                backup_dir.display()
            ));
        }
    }
    problems
}
