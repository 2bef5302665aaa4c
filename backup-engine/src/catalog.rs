//! Listing of existing backups.

use crate::backup::database::read_sidecar;
use crate::backup::manifest::{bytes_to_mb, DbSummary, Manifest, MANIFEST_FILE};
use crate::backup::{DATABASE_BACKUP_DIR, RUN_PREFIX};
use crate::config::EngineConfig;
use crate::integrity::validate_manifest;
use crate::utils::compress::is_gzip_path;
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A standalone database dump.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseBackupEntry {
    pub filename: String,
    pub path: PathBuf,
    pub size_mb: f64,
    pub modified: DateTime<Utc>,
    pub compressed: bool,
    pub summary: Option<DbSummary>,
}

/// One system backup run.
#[derive(Debug, Clone, Serialize)]
pub struct SystemBackupEntry {
    pub name: String,
    pub path: PathBuf,
    pub manifest: Option<Manifest>,
    /// Why the manifest could not be read
    pub error: Option<String>,
}

fn is_dump(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.ends_with(".sql") || name.ends_with(".sql.gz")
}

/// Database dumps under `<backup_root>/database`, newest first.
pub async fn list_backups(config: &EngineConfig) -> Result<Vec<DatabaseBackupEntry>> {
    let dir = config.storage.backup_root.join(DATABASE_BACKUP_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if !is_dump(&path) {
            continue;
        }
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                warn!("Cannot stat {}: {}", path.display(), e);
                continue;
            }
        };
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        entries.push(DatabaseBackupEntry {
            filename: entry.file_name().to_string_lossy().to_string(),
            size_mb: bytes_to_mb(metadata.len()),
            modified,
            compressed: is_gzip_path(&path),
            summary: read_sidecar(&path).await,
            path,
        });
    }

    entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.filename.cmp(&a.filename)));
    Ok(entries)
}

/// Run directories under the backup root, newest first. Runs whose manifest
/// cannot be read are listed with the reason.
pub fn list_system_backups(config: &EngineConfig) -> Result<Vec<SystemBackupEntry>> {
    let root = &config.storage.backup_root;
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(RUN_PREFIX) || !entry.path().is_dir() {
            continue;
        }
        let path = entry.path();
        let (manifest, error) = match validate_manifest(&path) {
            Ok(manifest) => (Some(manifest), None),
            Err(e) => {
                warn!(backup = %name, "Unreadable backup: {}", e);
                (None, Some(e.to_string()))
            }
        };
        runs.push(SystemBackupEntry {
            name,
            path,
            manifest,
            error,
        });
    }

    // Run names embed a sortable timestamp.
    runs.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(runs)
}

/// Newest run directory that has a manifest.
pub fn latest_system_backup(config: &EngineConfig) -> Option<PathBuf> {
    let runs = list_system_backups(config).ok()?;
    runs.into_iter()
        .find(|run| run.path.join(MANIFEST_FILE).is_file())
        .map(|run| run.path)
}
