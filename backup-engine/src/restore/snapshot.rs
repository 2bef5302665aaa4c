//! Pre-restore safety dump of the live database.

use crate::backup::run_stamp;
use crate::config::EngineConfig;
use crate::integrity::validate_dump_artifact;
use crate::tools::{ExternalToolRunner, PostgresOps};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const SNAPSHOT_PREFIX: &str = "pre_restore_";

/// Dump the current database into the snapshot directory.
///
/// Returns `None` on any failure; whether to continue without a snapshot is
/// the caller's decision.
pub async fn create_snapshot(runner: &dyn ExternalToolRunner, config: &EngineConfig) -> Option<PathBuf> {
    let dir = config.snapshot_dir();
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        error!("Cannot create snapshot directory {}: {}", dir.display(), e);
        return None;
    }

    let path = snapshot_path(&dir, &config.database.name, &run_stamp(Utc::now()));
    let ops = PostgresOps::new(runner, &config.database);

    info!(database = %config.database.name, "Creating pre-restore snapshot {}", path.display());
    if let Err(e) = ops.dump(&path).await {
        error!(database = %config.database.name, "Pre-restore snapshot failed: {}", e);
        discard(&path).await;
        return None;
    }
    if let Err(reason) = validate_dump_artifact(&path).await {
        error!("Pre-restore snapshot is unusable: {}", reason);
        discard(&path).await;
        return None;
    }

    info!("Pre-restore snapshot ready: {}", path.display());
    Some(path)
}

/// `<dir>/pre_restore_<db>_<stamp>.sql`. Stamps have one-second resolution;
/// a taken name gets a numeric suffix instead of being overwritten.
fn snapshot_path(dir: &Path, database: &str, stamp: &str) -> PathBuf {
    let stem = format!("{}{}_{}", SNAPSHOT_PREFIX, database, stamp);
    let path = dir.join(format!("{}.sql", stem));
    if !path.exists() {
        return path;
    }
    warn!("Snapshot {} already exists; keeping it and writing alongside", path.display());
    (2..)
        .map(|n| dir.join(format!("{}_{}.sql", stem, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial snapshot {}: {}", path.display(), e);
        }
    }
}
