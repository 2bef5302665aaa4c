//! System restore.
//!
//! Components are restored one at a time: database first, then directories,
//! then volumes. Nothing destructive runs until the manifest has validated
//! and every requested component has been resolved against it. Only the
//! database has snapshot rollback; a failed directory or volume restore
//! leaves earlier components as restored.

pub mod database;
pub mod directory;
pub mod snapshot;
pub mod volume;

use crate::backup::manifest::{ComponentKind, ComponentResult, Manifest};
use crate::catalog::latest_system_backup;
use crate::config::EngineConfig;
use crate::fs::walker::count_files;
use crate::fs::WalkOptions;
use crate::integrity::validate_manifest;
use crate::tools::{ContainerIo, ExternalToolRunner, PostgresOps};
use crate::utils::errors::{EngineError, Result, ValidationError};
use database::{DatabaseRestorer, DbRestoreOptions, DbRestoreState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use volume::VolumeRestorer;

/// Backup reference meaning "newest system backup".
pub const LATEST: &str = "latest";

#[derive(Debug, Clone, Serialize)]
pub struct ComponentOutcome {
    pub kind: ComponentKind,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ComponentOutcome {
    pub fn ok(kind: ComponentKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            success: true,
            message: message.into(),
            warnings: Vec::new(),
        }
    }

    pub fn failed(kind: ComponentKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            success: false,
            message: message.into(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    /// Run directory path, run name under the backup root, or `latest`
    pub backup: String,
    /// `None` restores every component the backup holds
    pub components: Option<Vec<String>>,
    pub create_snapshot: bool,
    pub force: bool,
    pub dry_run: bool,
}

impl RestoreRequest {
    pub fn new(backup: impl Into<String>) -> Self {
        Self {
            backup: backup.into(),
            components: None,
            create_snapshot: true,
            force: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub backup_name: String,
    pub backup_path: PathBuf,
    pub dry_run: bool,
    pub success: bool,
    pub components: BTreeMap<String, ComponentOutcome>,
    pub snapshot: Option<PathBuf>,
    pub rolled_back: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub database_states: Vec<DbRestoreState>,
}

/// Turn a backup reference into a run directory.
pub fn resolve_backup(config: &EngineConfig, reference: &str) -> Result<PathBuf> {
    if reference == LATEST {
        return latest_system_backup(config)
            .ok_or_else(|| ValidationError::NotFound(config.storage.backup_root.clone()).into());
    }
    let path = Path::new(reference);
    if path.is_dir() {
        return Ok(path.to_path_buf());
    }
    Ok(config.storage.backup_root.join(reference))
}

/// Requested names, checked against what the backup can actually restore.
/// Components whose backup failed are not restorable.
fn select_components(manifest: &Manifest, requested: Option<&[String]>) -> Result<Vec<String>> {
    let available: Vec<&String> = manifest
        .components
        .iter()
        .filter(|(_, r)| r.succeeded())
        .map(|(name, _)| name)
        .collect();

    let Some(requested) = requested else {
        for name in manifest.failed_components() {
            warn!(component = %name, "Skipping component whose backup failed");
        }
        if available.is_empty() {
            return Err(EngineError::NothingToRestore(manifest.backup_name.clone()));
        }
        return Ok(available.into_iter().cloned().collect());
    };

    let unknown: Vec<String> = requested
        .iter()
        .filter(|name| !available.contains(name))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(EngineError::UnknownComponent(unknown));
    }

    let mut selected: Vec<String> = Vec::new();
    for name in requested {
        if !selected.contains(name) {
            selected.push(name.clone());
        }
    }
    Ok(selected)
}

/// Database first, then directories, then volumes.
fn execution_order(manifest: &Manifest, selected: &[String]) -> Vec<String> {
    let rank = |name: &String| match manifest.components.get(name).map(ComponentResult::kind) {
        Some(ComponentKind::Database) => 0,
        Some(ComponentKind::Directory) => 1,
        _ => 2,
    };
    let mut ordered = selected.to_vec();
    ordered.sort_by(|a, b| rank(a).cmp(&rank(b)).then_with(|| a.cmp(b)));
    ordered
}

pub struct RestoreCoordinator {
    config: Arc<EngineConfig>,
    runner: Arc<dyn ExternalToolRunner>,
}

impl RestoreCoordinator {
    pub fn new(config: Arc<EngineConfig>, runner: Arc<dyn ExternalToolRunner>) -> Self {
        Self { config, runner }
    }

    /// Restore a system backup.
    ///
    /// Errors are returned only for pre-flight problems, before anything is
    /// touched. Component failures are reported in the result.
    pub async fn restore(&self, request: &RestoreRequest) -> Result<RestoreReport> {
        let run_dir = resolve_backup(&self.config, &request.backup)?;
        let manifest = validate_manifest(&run_dir)?;
        let selected = select_components(&manifest, request.components.as_deref())?;
        let order = execution_order(&manifest, &selected);
        self.preflight(&manifest, &order).await?;

        info!(
            backup = %manifest.backup_name,
            components = ?order,
            dry_run = request.dry_run,
            "Starting system restore"
        );

        let mut report = RestoreReport {
            backup_name: manifest.backup_name.clone(),
            backup_path: run_dir.clone(),
            dry_run: request.dry_run,
            success: false,
            components: BTreeMap::new(),
            snapshot: None,
            rolled_back: false,
            database_states: Vec::new(),
        };
        let mut recorded_tables = None;
        let mut directory_files = BTreeMap::new();

        for name in &order {
            let Some(result) = manifest.components.get(name) else {
                continue;
            };
            let outcome = match result {
                ComponentResult::Database(artifact) => {
                    let options = DbRestoreOptions {
                        create_snapshot: request.create_snapshot,
                        force: request.force,
                        dry_run: request.dry_run,
                    };
                    let mut artifact = artifact.clone();
                    let local = run_dir.join(&artifact.filename);
                    if local.is_file() {
                        artifact.filepath = local;
                    }
                    let db = DatabaseRestorer::new(self.runner.as_ref(), &self.config)
                        .restore(&artifact, options)
                        .await;
                    report.snapshot = db.snapshot.clone();
                    report.rolled_back = db.rolled_back;
                    report.database_states = db.states.clone();
                    recorded_tables = db.recorded.as_ref().map(|s| s.table_count);
                    ComponentOutcome {
                        kind: ComponentKind::Database,
                        success: db.success,
                        message: db.message,
                        warnings: db.warnings,
                    }
                }
                ComponentResult::Directory(dir) => {
                    let source = directory::backup_source(&run_dir, name, dir);
                    directory_files.insert(name.clone(), dir.files);
                    match self.directory_target(name, &dir.source_dir) {
                        Some(target) => {
                            let component = name.clone();
                            let dry_run = request.dry_run;
                            tokio::task::spawn_blocking(move || {
                                directory::restore_directory(&component, &source, &target, dry_run)
                            })
                            .await
                            .unwrap_or_else(|e| {
                                ComponentOutcome::failed(ComponentKind::Directory, format!("restore task failed: {}", e))
                            })
                        }
                        None => ComponentOutcome::failed(
                            ComponentKind::Directory,
                            format!("no restore target known for {}", name),
                        ),
                    }
                }
                ComponentResult::Volume(vol) => {
                    let archive = volume::archive_path(&run_dir, vol);
                    VolumeRestorer::new(self.runner.as_ref(), &self.config.volumes.helper_image)
                        .restore(&vol.volume, &archive, &vol.checksum, request.dry_run)
                        .await
                }
            };

            if outcome.success {
                info!(component = %name, "{}", outcome.message);
            } else {
                error!(component = %name, "{}", outcome.message);
            }
            report.components.insert(name.clone(), outcome);
        }

        if !request.dry_run {
            self.verify(&mut report, &manifest, recorded_tables, &directory_files).await;
        }

        report.success = report.components.values().all(|c| c.success);
        if report.success {
            info!(backup = %report.backup_name, "System restore complete");
        } else {
            let failed: Vec<&String> = report
                .components
                .iter()
                .filter(|(_, c)| !c.success)
                .map(|(name, _)| name)
                .collect();
            error!(backup = %report.backup_name, failed = ?failed, "System restore finished with failures");
        }
        Ok(report)
    }

    /// Tools the selected components depend on must answer before any
    /// component runs, so an unreachable server cannot leave a half-applied
    /// restore behind.
    async fn preflight(&self, manifest: &Manifest, order: &[String]) -> Result<()> {
        let kinds: Vec<ComponentKind> = order
            .iter()
            .filter_map(|name| manifest.components.get(name).map(ComponentResult::kind))
            .collect();

        if kinds.contains(&ComponentKind::Database) {
            let ops = PostgresOps::new(self.runner.as_ref(), &self.config.database);
            if let Err(e) = ops.ping().await {
                error!("Database server unreachable, restore aborted: {}", e);
                return Err(e.into());
            }
        }
        if kinds.contains(&ComponentKind::Volume) {
            let version = ["version".to_string()];
            if let Err(e) = self.runner.run_container_command(&version, ContainerIo::Capture).await {
                error!("Container runtime unreachable, restore aborted: {}", e);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Live path a directory component restores into: the configured path,
    /// else the path it was backed up from.
    fn directory_target(&self, name: &str, recorded: &Path) -> Option<PathBuf> {
        if let Some(source) = self.config.directories.get(name) {
            return Some(source.path.clone());
        }
        (!recorded.as_os_str().is_empty()).then(|| recorded.to_path_buf())
    }

    /// Re-check every component that reported success; disagreement flips it.
    async fn verify(
        &self,
        report: &mut RestoreReport,
        manifest: &Manifest,
        recorded_tables: Option<u64>,
        directory_files: &BTreeMap<String, usize>,
    ) {
        for (name, outcome) in report.components.iter_mut() {
            if !outcome.success {
                continue;
            }
            let problem = match manifest.components.get(name) {
                Some(ComponentResult::Database(_)) => self.verify_database(recorded_tables).await,
                Some(ComponentResult::Directory(dir)) => {
                    let expected = directory_files.get(name).copied().unwrap_or(0);
                    match self.directory_target(name, &dir.source_dir) {
                        Some(target) => verify_directory(&target, expected),
                        None => Some("restore target unknown".to_string()),
                    }
                }
                Some(ComponentResult::Volume(vol)) => {
                    if crate::backup::volume::volume_exists(self.runner.as_ref(), &vol.volume).await {
                        None
                    } else {
                        Some(format!("volume {} does not exist after restore", vol.volume))
                    }
                }
                None => None,
            };
            if let Some(problem) = problem {
                error!(component = %name, "Post-restore verification failed: {}", problem);
                outcome.success = false;
                outcome.message = format!("{} (verification failed: {})", outcome.message, problem);
            }
        }
    }

    async fn verify_database(&self, recorded_tables: Option<u64>) -> Option<String> {
        let ops = PostgresOps::new(self.runner.as_ref(), &self.config.database);
        if let Err(e) = ops.ping_target().await {
            return Some(format!("database not reachable: {}", e));
        }
        match ops.table_count().await {
            Ok(0) if recorded_tables.unwrap_or(0) > 0 => Some("restored database has no tables".into()),
            Ok(_) => None,
            Err(e) => Some(format!("cannot count tables: {}", e)),
        }
    }
}

fn verify_directory(target: &Path, expected_files: usize) -> Option<String> {
    if !target.is_dir() {
        return Some(format!("{} does not exist", target.display()));
    }
    if expected_files == 0 {
        return None;
    }
    match count_files(target, &WalkOptions::default()) {
        Ok(0) => Some(format!("{} is empty", target.display())),
        Ok(_) => None,
        Err(e) => Some(format!("cannot read {}: {}", target.display(), e)),
    }
}

/// Restore with a one-off coordinator.
pub async fn restore_system(
    config: Arc<EngineConfig>,
    runner: Arc<dyn ExternalToolRunner>,
    request: &RestoreRequest,
) -> Result<RestoreReport> {
    RestoreCoordinator::new(config, runner).restore(request).await
}
