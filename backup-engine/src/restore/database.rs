//! Database restore as an explicit state machine.
//!
//! `Validating` always runs first and fails closed. The destructive window
//! opens at `Dropping` and closes once `Loading` succeeds. A failure inside
//! that window replays the pre-restore snapshot when one exists; without a
//! snapshot the database is left freshly created and empty.

use super::snapshot::create_snapshot;
use crate::backup::database::read_sidecar;
use crate::backup::manifest::{DatabaseResult, DbSummary};
use crate::config::EngineConfig;
use crate::integrity::{sha256_file, validate_dump_artifact};
use crate::tools::{ExternalToolRunner, PostgresOps};
use crate::utils::compress::{gunzip_file, is_gzip_path};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DbRestoreState {
    Validating,
    Snapshotting,
    TerminatingConnections,
    Dropping,
    Creating,
    ExtensionSetup,
    Loading,
    Verifying,
    RollingBack,
    Done,
    Failed,
}

impl DbRestoreState {
    /// States that change the live database.
    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            DbRestoreState::Dropping
                | DbRestoreState::Creating
                | DbRestoreState::ExtensionSetup
                | DbRestoreState::Loading
                | DbRestoreState::RollingBack
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DbRestoreOptions {
    pub create_snapshot: bool,
    /// Continue when the snapshot could not be taken
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbRestoreOutcome {
    pub success: bool,
    pub message: String,
    pub warnings: Vec<String>,
    pub snapshot: Option<PathBuf>,
    pub rolled_back: bool,
    /// Every state entered, in order
    pub states: Vec<DbRestoreState>,
    /// Summary recorded when the backup was taken, if any
    #[serde(skip)]
    pub recorded: Option<DbSummary>,
}

/// Failure inside the destructive sequence, with the state it happened in.
struct StepFailure {
    state: DbRestoreState,
    message: String,
}

pub struct DatabaseRestorer<'a> {
    runner: &'a dyn ExternalToolRunner,
    config: &'a EngineConfig,
    outcome: DbRestoreOutcome,
}

impl<'a> DatabaseRestorer<'a> {
    pub fn new(runner: &'a dyn ExternalToolRunner, config: &'a EngineConfig) -> Self {
        Self {
            runner,
            config,
            outcome: DbRestoreOutcome {
                success: false,
                message: String::new(),
                warnings: Vec::new(),
                snapshot: None,
                rolled_back: false,
                states: Vec::new(),
                recorded: None,
            },
        }
    }

    fn ops(&self) -> PostgresOps<'a> {
        PostgresOps::new(self.runner, &self.config.database)
    }

    fn enter(&mut self, state: DbRestoreState) {
        debug!(database = %self.config.database.name, ?state, "Database restore state");
        self.outcome.states.push(state);
    }

    fn warn(&mut self, message: String) {
        warn!(database = %self.config.database.name, "{}", message);
        self.outcome.warnings.push(message);
    }

    fn finish(mut self, success: bool, message: String) -> DbRestoreOutcome {
        self.enter(if success { DbRestoreState::Done } else { DbRestoreState::Failed });
        if success {
            info!(database = %self.config.database.name, "{}", message);
        } else {
            error!(database = %self.config.database.name, "{}", message);
        }
        self.outcome.success = success;
        self.outcome.message = message;
        self.outcome
    }

    /// Restore `artifact` (the manifest's database entry) into the configured database.
    pub async fn restore(mut self, artifact: &DatabaseResult, options: DbRestoreOptions) -> DbRestoreOutcome {
        self.enter(DbRestoreState::Validating);
        let staged = match self.validate(artifact).await {
            Ok(staged) => staged,
            Err(message) => return self.finish(false, message),
        };

        if options.dry_run {
            staged.cleanup().await;
            let message = format!(
                "would restore {} into database {}",
                artifact.filepath.display(),
                self.config.database.name
            );
            return self.finish(true, message);
        }

        if options.create_snapshot {
            self.enter(DbRestoreState::Snapshotting);
            self.outcome.snapshot = create_snapshot(self.runner, self.config).await;
            if self.outcome.snapshot.is_none() {
                if !options.force {
                    staged.cleanup().await;
                    return self.finish(
                        false,
                        "pre-restore snapshot failed; refusing to restore without one (use force to override)"
                            .into(),
                    );
                }
                self.warn("pre-restore snapshot failed; continuing without rollback because force is set".into());
            }
        } else {
            self.warn("restoring without a pre-restore snapshot; a failed load cannot be rolled back".into());
        }

        let applied = self.apply(&staged.sql).await;
        staged.cleanup().await;

        if let Err(failure) = applied {
            return self.handle_failure(failure).await;
        }

        self.enter(DbRestoreState::Verifying);
        self.verify_counts().await;

        let message = format!("database {} restored from {}", self.config.database.name, artifact.filename);
        self.finish(true, message)
    }

    /// Integrity and reachability checks. Nothing destructive happens here.
    async fn validate(&mut self, artifact: &DatabaseResult) -> Result<StagedSql, String> {
        let path = &artifact.filepath;
        if !path.is_file() {
            return Err(format!("database artifact not found: {}", path.display()));
        }
        if !artifact.checksum.is_empty() {
            let actual = sha256_file(path)
                .await
                .map_err(|e| format!("cannot checksum {}: {}", path.display(), e))?;
            if actual != artifact.checksum {
                return Err(format!("checksum mismatch for {}", path.display()));
            }
        }

        let staged = StagedSql::prepare(path, &self.config.snapshot_dir()).await?;
        if let Err(reason) = validate_dump_artifact(&staged.sql).await {
            staged.cleanup().await;
            return Err(format!("database artifact failed integrity check: {}", reason));
        }

        if let Err(e) = self.ops().ping().await {
            staged.cleanup().await;
            return Err(format!("database server unreachable: {}", e));
        }

        self.outcome.recorded = match &artifact.db_summary {
            Some(summary) => Some(summary.clone()),
            None => read_sidecar(path).await,
        };
        Ok(staged)
    }

    /// Terminate, drop, create, enable extensions, load.
    async fn apply(&mut self, sql: &Path) -> Result<(), StepFailure> {
        let ops = self.ops();

        self.enter(DbRestoreState::TerminatingConnections);
        if let Err(e) = ops.terminate_connections().await {
            self.warn(format!("could not terminate existing connections: {}", e));
        }

        self.enter(DbRestoreState::Dropping);
        ops.drop_database().await.map_err(|e| StepFailure {
            state: DbRestoreState::Dropping,
            message: format!("drop database failed: {}", e),
        })?;

        self.enter(DbRestoreState::Creating);
        ops.create_database().await.map_err(|e| StepFailure {
            state: DbRestoreState::Creating,
            message: format!("create database failed: {}", e),
        })?;

        self.enter(DbRestoreState::ExtensionSetup);
        ops.ensure_extensions().await.map_err(|e| StepFailure {
            state: DbRestoreState::ExtensionSetup,
            message: format!("extension setup failed: {}", e),
        })?;

        self.enter(DbRestoreState::Loading);
        info!(database = %self.config.database.name, "Loading {}", sql.display());
        ops.load(sql).await.map_err(|e| StepFailure {
            state: DbRestoreState::Loading,
            message: format!("load failed: {}", e),
        })
    }

    async fn handle_failure(mut self, failure: StepFailure) -> DbRestoreOutcome {
        // A failed drop leaves the old database in place.
        if failure.state == DbRestoreState::Dropping {
            return self.finish(false, failure.message);
        }

        let Some(snapshot) = self.outcome.snapshot.clone() else {
            let message = format!(
                "{}; no snapshot available, database {} left empty",
                failure.message, self.config.database.name
            );
            return self.finish(false, message);
        };

        self.enter(DbRestoreState::RollingBack);
        warn!(
            database = %self.config.database.name,
            "Restore failed in {:?}, rolling back to {}",
            failure.state,
            snapshot.display()
        );
        match self.apply(&snapshot).await {
            Ok(()) => {
                self.outcome.rolled_back = true;
                let message = format!("{}; rolled back to pre-restore snapshot", failure.message);
                self.finish(false, message)
            }
            Err(rollback) => {
                let message = format!(
                    "{}; rollback from {} also failed ({}); operator intervention required",
                    failure.message,
                    snapshot.display(),
                    rollback.message
                );
                self.finish(false, message)
            }
        }
    }

    /// Compare live counts with those recorded at backup time. Warnings only.
    async fn verify_counts(&mut self) {
        let Some(recorded) = self.outcome.recorded.clone() else {
            self.warn("no recorded counts for this backup; count verification skipped".into());
            return;
        };
        let ops = self.ops();

        match ops.table_count().await {
            Ok(n) if n != recorded.table_count => self.warn(format!(
                "table count mismatch: backup had {}, restored database has {}",
                recorded.table_count, n
            )),
            Ok(_) => {}
            Err(e) => self.warn(format!("could not count tables: {}", e)),
        }

        let tables: Vec<String> = recorded.row_counts.keys().cloned().collect();
        let live = ops.row_counts(&tables).await;
        for (table, expected) in &recorded.row_counts {
            match live.get(table) {
                Some(actual) if actual == expected => {}
                Some(actual) => self.warn(format!(
                    "row count mismatch for {}: backup had {}, restored database has {}",
                    table, expected, actual
                )),
                None => self.warn(format!("could not count rows in {}", table)),
            }
        }
    }
}

/// Plain SQL ready for loading; a decompressed copy is removed afterwards.
struct StagedSql {
    sql: PathBuf,
    temporary: bool,
}

impl StagedSql {
    async fn prepare(artifact: &Path, staging_dir: &Path) -> Result<Self, String> {
        if !is_gzip_path(artifact) {
            return Ok(Self {
                sql: artifact.to_path_buf(),
                temporary: false,
            });
        }

        tokio::fs::create_dir_all(staging_dir)
            .await
            .map_err(|e| format!("cannot create {}: {}", staging_dir.display(), e))?;
        let name = artifact
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "restore.sql".into());
        let sql = staging_dir.join(format!(".staging_{}", name));
        let staged = Self { sql, temporary: true };

        if let Err(e) = gunzip_file(artifact, &staged.sql).await {
            staged.cleanup().await;
            return Err(format!("cannot decompress {}: {}", artifact.display(), e));
        }
        Ok(staged)
    }

    async fn cleanup(&self) {
        if !self.temporary {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(&self.sql).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove staged SQL {}: {}", self.sql.display(), e);
            }
        }
    }
}
