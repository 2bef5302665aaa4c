//! Manifest types for system backups.
//!
//! A manifest records every configured component of one backup run, success
//! or not, and is serialized as `metadata.json` in the run directory. It is
//! written exactly once; later runs never touch an older manifest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "metadata.json";
pub const CURRENT_VERSION: &str = "2.0";
pub const SUPPORTED_VERSIONS: &[&str] = &["1.0", "2.0"];

/// Manifest key of the database component.
pub const DATABASE_COMPONENT: &str = "database";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Database,
    Directory,
    Volume,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComponentKind::Database => "database",
            ComponentKind::Directory => "directory",
            ComponentKind::Volume => "volume",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub backup_name: String,
    pub backup_path: PathBuf,
    pub components: BTreeMap<String, ComponentResult>,
    pub total_size_mb: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
}

/// Per-component outcome, tagged by component kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComponentResult {
    Database(DatabaseResult),
    Directory(DirectoryResult),
    Volume(VolumeResult),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseResult {
    pub filename: String,
    pub filepath: PathBuf,
    pub size_mb: f64,
    /// SHA-256 (hex) of the final artifact
    pub checksum: String,
    #[serde(default)]
    pub db_summary: Option<DbSummary>,
    pub compressed: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryResult {
    pub component: String,
    pub source_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub files: usize,
    pub size_mb: f64,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeResult {
    pub volume: String,
    pub filename: String,
    pub filepath: PathBuf,
    pub size_mb: f64,
    pub checksum: String,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Database state captured at dump time; also written as the dump's sidecar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbSummary {
    pub database: String,
    pub created_at: DateTime<Utc>,
    pub table_count: u64,
    #[serde(default)]
    pub row_counts: BTreeMap<String, u64>,
}

impl DatabaseResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            errors: vec![error.into()],
            ..Self::default()
        }
    }
}

impl DirectoryResult {
    pub fn failed(component: &str, source_dir: &Path, backup_dir: &Path, error: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            source_dir: source_dir.to_path_buf(),
            backup_dir: backup_dir.to_path_buf(),
            errors: vec![error.into()],
            ..Self::default()
        }
    }
}

impl VolumeResult {
    pub fn failed(volume: &str, error: impl Into<String>) -> Self {
        Self {
            volume: volume.to_string(),
            errors: vec![error.into()],
            ..Self::default()
        }
    }
}

impl ComponentResult {
    /// Result for a component whose task never produced one (timeout, panic).
    pub fn failed(kind: ComponentKind, name: &str, error: impl Into<String>) -> Self {
        match kind {
            ComponentKind::Database => ComponentResult::Database(DatabaseResult::failed(error)),
            ComponentKind::Directory => ComponentResult::Directory(DirectoryResult::failed(
                name,
                Path::new(""),
                Path::new(""),
                error,
            )),
            ComponentKind::Volume => ComponentResult::Volume(VolumeResult::failed(name, error)),
        }
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentResult::Database(_) => ComponentKind::Database,
            ComponentResult::Directory(_) => ComponentKind::Directory,
            ComponentResult::Volume(_) => ComponentKind::Volume,
        }
    }

    pub fn errors(&self) -> &[String] {
        match self {
            ComponentResult::Database(r) => &r.errors,
            ComponentResult::Directory(r) => &r.errors,
            ComponentResult::Volume(r) => &r.errors,
        }
    }

    pub fn size_mb(&self) -> f64 {
        match self {
            ComponentResult::Database(r) => r.size_mb,
            ComponentResult::Directory(r) => r.size_mb,
            ComponentResult::Volume(r) => r.size_mb,
        }
    }

    /// Did the component produce a usable artifact? A directory with some
    /// per-file copy errors still counts (partial success).
    pub fn succeeded(&self) -> bool {
        match self {
            ComponentResult::Database(r) => r.errors.is_empty() && !r.filename.is_empty(),
            ComponentResult::Directory(r) => r.errors.is_empty() || r.files > 0,
            ComponentResult::Volume(r) => r.errors.is_empty() && !r.filename.is_empty(),
        }
    }
}

impl Manifest {
    pub fn new(backup_name: String, backup_path: PathBuf, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            version: CURRENT_VERSION.to_string(),
            backup_name,
            backup_path,
            components: BTreeMap::new(),
            total_size_mb: 0.0,
            validation_errors: Vec::new(),
        }
    }

    pub fn path_in(run_dir: &Path) -> PathBuf {
        run_dir.join(MANIFEST_FILE)
    }

    /// Record a component and refresh the aggregate size.
    pub fn insert(&mut self, name: String, result: ComponentResult) {
        self.components.insert(name, result);
        self.total_size_mb = self
            .components
            .values()
            .filter(|r| r.succeeded())
            .map(ComponentResult::size_mb)
            .sum();
    }

    pub fn failed_components(&self) -> Vec<&str> {
        self.components
            .iter()
            .filter(|(_, r)| !r.succeeded())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Persist as `<backup_path>/metadata.json` via write-then-rename.
    pub async fn write(&self) -> std::io::Result<PathBuf> {
        let path = Self::path_in(&self.backup_path);
        let tmp = self.backup_path.join(format!("{}.tmp", MANIFEST_FILE));
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(path)
    }
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn directory(files: usize, size_mb: f64, errors: &[&str]) -> ComponentResult {
        ComponentResult::Directory(DirectoryResult {
            component: "config".into(),
            files,
            size_mb,
            errors: errors.iter().map(|e| e.to_string()).collect(),
            ..DirectoryResult::default()
        })
    }

    #[test]
    fn test_total_size_counts_only_successful_components() {
        let mut manifest = Manifest::new("backup_x".into(), PathBuf::from("/tmp/x"), Utc::now());
        manifest.insert("config".into(), directory(3, 1.5, &[]));
        manifest.insert("partial".into(), directory(2, 0.5, &["one file failed"]));
        manifest.insert("outputs".into(), directory(0, 0.0, &["source directory not found"]));
        manifest.insert(
            "database".into(),
            ComponentResult::Database(DatabaseResult::failed("pg_dump failed")),
        );

        assert_eq!(manifest.components.len(), 4);
        assert!((manifest.total_size_mb - 2.0).abs() < 1e-9);
        assert_eq!(manifest.failed_components(), vec!["database", "outputs"]);
    }

    #[test]
    fn test_component_result_is_tagged_by_kind() {
        let result = ComponentResult::Volume(VolumeResult::failed("pgdata", "missing"));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["kind"], "volume");
        assert_eq!(json["volume"], "pgdata");
        assert_eq!(json["errors"][0], "missing");
    }

    #[tokio::test]
    async fn test_write_then_read_back() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let mut manifest =
            Manifest::new("backup_1".into(), temp_dir.path().to_path_buf(), Utc::now());
        fs::write(temp_dir.path().join(MANIFEST_FILE), "{ stale")?;
        manifest.insert("config".into(), directory(1, 0.25, &[]));

        let path = manifest.write().await?;
        assert_eq!(path, temp_dir.path().join(MANIFEST_FILE));
        assert!(!temp_dir.path().join("metadata.json.tmp").exists());

        let loaded: Manifest = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(loaded.version, CURRENT_VERSION);
        assert_eq!(loaded.components.len(), 1);
        assert!(loaded.validation_errors.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_write_into_missing_run_dir_fails() {
        let temp_dir = TempDir::new().unwrap();
        let run_dir = temp_dir.path().join("gone");
        let manifest = Manifest::new("backup_2".into(), run_dir.clone(), Utc::now());

        assert!(manifest.write().await.is_err());
        assert!(!run_dir.exists());
    }
}
