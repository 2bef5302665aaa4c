//! Database component backup.
//!
//! Dump → sanity check → optional gzip → checksum of the final artifact →
//! sidecar summary. A dump that fails any check is deleted so no partial
//! artifact is left behind, and only this component fails.

use super::manifest::{bytes_to_mb, DatabaseResult, DbSummary};
use super::{remove_partial, seal_artifact};
use crate::config::DatabaseConfig;
use crate::integrity::validate_dump_artifact;
use crate::tools::{ExternalToolRunner, PostgresOps};
use crate::utils::compress::gzip_file;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Dump the configured database into `dest_dir`.
pub async fn backup_database(
    runner: &dyn ExternalToolRunner,
    db: &DatabaseConfig,
    dest_dir: &Path,
    compress: bool,
    stamp: &str,
) -> DatabaseResult {
    let ops = PostgresOps::new(runner, db);

    if let Err(e) = tokio::fs::create_dir_all(dest_dir).await {
        return DatabaseResult::failed(format!("cannot create {}: {}", dest_dir.display(), e));
    }

    let filename = format!("{}_{}.sql", db.name, stamp);
    let dump_path = dest_dir.join(&filename);

    info!(database = %db.name, path = %dump_path.display(), "Dumping database");
    if let Err(e) = ops.dump(&dump_path).await {
        error!(database = %db.name, "Database dump failed: {}", e);
        remove_partial(&dump_path).await;
        return DatabaseResult::failed(format!("database dump failed: {}", e));
    }

    if let Err(reason) = validate_dump_artifact(&dump_path).await {
        error!(database = %db.name, "Dump failed integrity check: {}", reason);
        remove_partial(&dump_path).await;
        return DatabaseResult::failed(format!("integrity check failed: {}", reason));
    }

    let db_summary = collect_summary(&ops, &db.verify_tables).await;

    let (artifact, compressed) = if compress {
        let gz_path = dest_dir.join(format!("{}.gz", filename));
        match gzip_file(&dump_path, &gz_path).await {
            Ok(_) => {
                if let Err(e) = tokio::fs::remove_file(&dump_path).await {
                    warn!("Failed to remove uncompressed dump {}: {}", dump_path.display(), e);
                }
                (gz_path, true)
            }
            Err(e) => {
                warn!("Compression failed, keeping uncompressed dump: {}", e);
                remove_partial(&gz_path).await;
                (dump_path, false)
            }
        }
    } else {
        (dump_path, false)
    };

    let (checksum, size) = match seal_artifact(&artifact).await {
        Ok(sealed) => sealed,
        Err(reason) => {
            error!(database = %db.name, "{}", reason);
            return DatabaseResult::failed(reason);
        }
    };

    if let Some(summary) = &db_summary {
        if let Err(e) = write_sidecar(&artifact, summary).await {
            warn!("Failed to write sidecar metadata for {}: {}", artifact.display(), e);
        }
    }

    info!(
        database = %db.name,
        size_bytes = size,
        compressed,
        "Database backup complete: {}",
        artifact.display()
    );

    DatabaseResult {
        filename: artifact
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        filepath: artifact,
        size_mb: bytes_to_mb(size),
        checksum,
        db_summary,
        compressed,
        errors: Vec::new(),
    }
}

/// Table and row counts at dump time. Missing summary is not an error.
async fn collect_summary(ops: &PostgresOps<'_>, tables: &[String]) -> Option<DbSummary> {
    let table_count = match ops.table_count().await {
        Ok(n) => n,
        Err(e) => {
            warn!("Could not collect database summary: {}", e);
            return None;
        }
    };
    Some(DbSummary {
        database: ops.database().to_string(),
        created_at: Utc::now(),
        table_count,
        row_counts: ops.row_counts(tables).await,
    })
}

/// `<dir>/<name>.sql[.gz]` → `<dir>/<name>.json`
pub fn sidecar_path(artifact: &Path) -> PathBuf {
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = name.strip_suffix(".gz").unwrap_or(&name);
    let stem = stem.strip_suffix(".sql").unwrap_or(stem);
    artifact.with_file_name(format!("{}.json", stem))
}

async fn write_sidecar(artifact: &Path, summary: &DbSummary) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    tokio::fs::write(sidecar_path(artifact), json).await
}

/// Read the sidecar written next to a dump, if any.
pub async fn read_sidecar(artifact: &Path) -> Option<DbSummary> {
    let content = tokio::fs::read_to_string(sidecar_path(artifact)).await.ok()?;
    match serde_json::from_str(&content) {
        Ok(summary) => Some(summary),
        Err(e) => {
            warn!("Ignoring unreadable sidecar for {}: {}", artifact.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::sha256_file;
    use crate::tools::fake::FakeToolRunner;
    use crate::utils::compress::gunzip_file;
    use tempfile::TempDir;

    fn db() -> DatabaseConfig {
        DatabaseConfig {
            name: "app".into(),
            verify_tables: vec!["articles".into()],
            ..DatabaseConfig::default()
        }
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/b/app_20261017_120000.sql.gz")),
            PathBuf::from("/b/app_20261017_120000.json")
        );
        assert_eq!(
            sidecar_path(Path::new("/b/app_1.sql")),
            PathBuf::from("/b/app_1.json")
        );
    }

    #[tokio::test]
    async fn test_compressed_backup() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let runner = FakeToolRunner::new().with_row_count("articles", 5);

        let result = backup_database(&runner, &db(), temp_dir.path(), true, "20261017_120000").await;

        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert!(result.compressed);
        assert_eq!(result.filename, "app_20261017_120000.sql.gz");
        assert!(result.filepath.exists());
        // Uncompressed original is gone once the compressed copy exists
        assert!(!temp_dir.path().join("app_20261017_120000.sql").exists());
        // Checksum covers the final (compressed) artifact
        assert_eq!(result.checksum, sha256_file(&result.filepath).await?);

        let out = temp_dir.path().join("check.sql");
        gunzip_file(&result.filepath, &out).await?;
        assert_eq!(std::fs::read(&out)?, crate::tools::fake::VALID_DUMP);

        let sidecar = read_sidecar(&result.filepath).await.expect("sidecar written");
        assert_eq!(sidecar.row_counts.get("articles"), Some(&5));
        assert_eq!(result.db_summary, Some(sidecar));
        Ok(())
    }

    #[tokio::test]
    async fn test_uncompressed_backup() {
        let temp_dir = TempDir::new().unwrap();
        let runner = FakeToolRunner::new();

        let result = backup_database(&runner, &db(), temp_dir.path(), false, "s").await;
        assert!(result.errors.is_empty());
        assert!(!result.compressed);
        assert_eq!(result.filename, "app_s.sql");
        assert!(result.size_mb > 0.0);
    }

    #[tokio::test]
    async fn test_empty_dump_is_removed() {
        let temp_dir = TempDir::new().unwrap();
        let runner = FakeToolRunner::new();
        runner.set_dump_content(Some(b""));

        let result = backup_database(&runner, &db(), temp_dir.path(), true, "s").await;
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("integrity"));
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_dump_is_removed() {
        let temp_dir = TempDir::new().unwrap();
        let runner = FakeToolRunner::new();
        runner.set_dump_content(Some(b"pg_dump: error: connection to server lost\n"));

        let result = backup_database(&runner, &db(), temp_dir.path(), false, "s").await;
        assert!(!result.errors.is_empty());
        assert!(!temp_dir.path().join("app_s.sql").exists());
    }

    #[tokio::test]
    async fn test_dump_tool_failure() {
        let temp_dir = TempDir::new().unwrap();
        let runner = FakeToolRunner::new();
        runner.set_dump_content(None);

        let result = backup_database(&runner, &db(), temp_dir.path(), true, "s").await;
        assert!(result.errors[0].contains("dump failed"));
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }
}
