//! System backups: one task per component on a bounded worker pool,
//! aggregated into a manifest once every task has resolved.

pub mod database;
pub mod directory;
pub mod manifest;
pub mod volume;

use crate::config::EngineConfig;
use crate::fs::GitignoreFilter;
use crate::integrity::{check_critical_patterns, sha256_file};
use crate::tools::ExternalToolRunner;
use crate::utils::errors::Result;
use chrono::{DateTime, Local, Utc};
use futures_util::future::join_all;
use manifest::{ComponentKind, ComponentResult, DatabaseResult, Manifest, DATABASE_COMPONENT};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Directory under the backup root holding standalone database backups.
pub const DATABASE_BACKUP_DIR: &str = "database";

/// Prefix of every run directory name.
pub const RUN_PREFIX: &str = "backup_";

/// What a backup run should capture.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub include_database: bool,
    /// Names of configured directory components
    pub directories: Vec<String>,
    pub volumes: Vec<String>,
    pub compress: bool,
    pub verify: bool,
}

impl BackupRequest {
    /// Everything the configuration knows about.
    pub fn all(config: &EngineConfig) -> Self {
        Self {
            include_database: true,
            directories: config.directories.keys().cloned().collect(),
            volumes: config.volumes.names.clone(),
            compress: config.backup.compress,
            verify: config.backup.verify,
        }
    }
}

/// Second-resolution run stamp. Two runs started within the same second
/// share a run directory.
pub fn run_stamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y%m%d_%H%M%S").to_string()
}

pub struct ParallelBackupCoordinator {
    config: Arc<EngineConfig>,
    runner: Arc<dyn ExternalToolRunner>,
}

impl ParallelBackupCoordinator {
    pub fn new(config: Arc<EngineConfig>, runner: Arc<dyn ExternalToolRunner>) -> Self {
        Self { config, runner }
    }

    /// Run every requested component backup and persist the manifest.
    ///
    /// Component failures never fail the run; they are recorded in the
    /// manifest. Only being unable to create the run directory or write the
    /// manifest returns an error.
    pub async fn run(&self, request: &BackupRequest) -> Result<Manifest> {
        let started = Utc::now();
        let stamp = run_stamp(started);
        let backup_name = format!("{}{}", RUN_PREFIX, stamp);
        let run_dir = self.config.storage.backup_root.join(&backup_name);

        if run_dir.exists() {
            warn!("Run directory {} already exists; runs within the same second share it", run_dir.display());
        }
        tokio::fs::create_dir_all(&run_dir).await?;

        info!(
            backup = %backup_name,
            workers = self.config.backup.workers,
            "Starting system backup"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.backup.workers));
        let mut tasks: Vec<(String, ComponentKind, JoinHandle<ComponentResult>)> = Vec::new();
        let mut immediate: Vec<(String, ComponentResult)> = Vec::new();

        if request.include_database {
            let runner = Arc::clone(&self.runner);
            let config = Arc::clone(&self.config);
            let dir = run_dir.clone();
            let stamp = stamp.clone();
            let compress = request.compress;
            let work = async move {
                ComponentResult::Database(
                    database::backup_database(runner.as_ref(), &config.database, &dir, compress, &stamp)
                        .await,
                )
            };
            tasks.push(self.spawn(DATABASE_COMPONENT.to_string(), ComponentKind::Database, &semaphore, work));
        }

        for name in &request.directories {
            let Some(source) = self.config.directories.get(name) else {
                immediate.push((
                    name.clone(),
                    ComponentResult::Directory(manifest::DirectoryResult::failed(
                        name,
                        Path::new(""),
                        &run_dir.join(name),
                        format!("directory component {} is not configured", name),
                    )),
                ));
                continue;
            };

            let config = Arc::clone(&self.config);
            let source_path = source.path.clone();
            let dir = run_dir.clone();
            let component = name.clone();
            let task_name = name.clone();

            let work = async move {
                let handle = tokio::task::spawn_blocking(move || {
                    let filter = directory_filter(&config, &component, &source_path);
                    directory::backup_directory(&source_path, &dir, &component, filter)
                });
                match handle.await {
                    Ok(result) => ComponentResult::Directory(result),
                    Err(e) => ComponentResult::failed(
                        ComponentKind::Directory,
                        &task_name,
                        format!("copy task failed: {}", e),
                    ),
                }
            };
            tasks.push(self.spawn(name.clone(), ComponentKind::Directory, &semaphore, work));
        }

        for name in &request.volumes {
            let runner = Arc::clone(&self.runner);
            let image = self.config.volumes.helper_image.clone();
            let volume = name.clone();
            let dir = run_dir.clone();
            let stamp = stamp.clone();
            let work = async move {
                ComponentResult::Volume(
                    volume::backup_docker_volume(runner.as_ref(), &image, &volume, &dir, &stamp).await,
                )
            };
            tasks.push(self.spawn(name.clone(), ComponentKind::Volume, &semaphore, work));
        }

        // Aggregation happens here, on one task, after every future resolved.
        let mut manifest = Manifest::new(backup_name.clone(), run_dir.clone(), started);
        for (name, result) in immediate {
            manifest.insert(name, result);
        }
        let finished = join_all(
            tasks
                .into_iter()
                .map(|(name, kind, handle)| async move { (name, kind, handle.await) }),
        )
        .await;
        for (name, kind, joined) in finished {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(component = %name, "Backup task panicked: {}", e);
                    ComponentResult::failed(kind, &name, format!("backup task panicked: {}", e))
                }
            };
            manifest.insert(name, result);
        }

        if request.verify {
            manifest.validation_errors = self.verify(&manifest).await;
            for problem in &manifest.validation_errors {
                warn!(backup = %backup_name, "Verification: {}", problem);
            }
        }

        let path = manifest.write().await?;

        let failed = manifest.failed_components();
        if failed.is_empty() {
            info!(backup = %backup_name, total_size_mb = manifest.total_size_mb, "System backup complete");
        } else {
            warn!(
                backup = %backup_name,
                failed = ?failed,
                total_size_mb = manifest.total_size_mb,
                "System backup finished with failed components"
            );
        }
        info!("Manifest written to {}", path.display());

        Ok(manifest)
    }

    /// Spawn `work` behind a worker-pool permit and the per-kind timeout. A
    /// timeout turns into an error result for this component only.
    fn spawn<F>(
        &self,
        name: String,
        kind: ComponentKind,
        semaphore: &Arc<Semaphore>,
        work: F,
    ) -> (String, ComponentKind, JoinHandle<ComponentResult>)
    where
        F: Future<Output = ComponentResult> + Send + 'static,
    {
        let sem = Arc::clone(semaphore);
        let timeout = self.config.backup.timeout_for(kind);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let _permit = match sem.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return ComponentResult::failed(kind, &task_name, format!("worker pool closed: {}", e)),
            };
            info!(component = %task_name, %kind, "Component backup started");
            match tokio::time::timeout(timeout, work).await {
                Ok(result) => result,
                Err(_) => {
                    error!(component = %task_name, "Component backup timed out after {}s", timeout.as_secs());
                    ComponentResult::failed(
                        kind,
                        &task_name,
                        format!("timed out after {}s", timeout.as_secs()),
                    )
                }
            }
        });

        (name, kind, handle)
    }

    /// Post-run checks; problems become manifest validation errors.
    async fn verify(&self, manifest: &Manifest) -> Vec<String> {
        let mut problems = Vec::new();
        for (name, result) in &manifest.components {
            if !result.succeeded() {
                continue;
            }
            match result {
                ComponentResult::Directory(r) => {
                    let patterns = self
                        .config
                        .directories
                        .get(name)
                        .map(|d| d.critical_patterns.clone())
                        .unwrap_or_default();
                    problems.extend(check_critical_patterns(name, &r.backup_dir, &patterns));
                }
                ComponentResult::Database(DatabaseResult { filepath, checksum, .. })
                | ComponentResult::Volume(manifest::VolumeResult { filepath, checksum, .. }) => {
                    match sha256_file(filepath).await {
                        Ok(actual) if &actual == checksum => {}
                        Ok(_) => problems.push(format!("{}: checksum mismatch for {}", name, filepath.display())),
                        Err(e) => problems.push(format!("{}: cannot re-read {}: {}", name, filepath.display(), e)),
                    }
                }
            }
        }
        problems
    }
}

/// Ignore filter for directory component `name` at `source`: the project
/// `.gitignore` plus extra patterns, applied relative to the project root.
/// Exempt components are copied unfiltered.
fn directory_filter(config: &EngineConfig, name: &str, source: &Path) -> GitignoreFilter {
    let ignore = &config.ignore;
    if !ignore.respect_gitignore || ignore.exempt_components.iter().any(|c| c == name) {
        return GitignoreFilter::empty();
    }
    let always_include = config
        .directories
        .get(name)
        .map(|d| d.always_include.clone())
        .unwrap_or_default();

    let project_root = config.project_root();
    let filter = GitignoreFilter::from_file(
        &project_root.join(".gitignore"),
        ignore.extra_patterns.as_slice(),
        always_include.as_slice(),
    );
    match project_relative(source, &project_root) {
        Some(base) => filter.with_base(&base),
        None => {
            debug!(component = %name, "{} lies outside the project root", source.display());
            filter
        }
    }
}

fn project_relative(source: &Path, project_root: &Path) -> Option<PathBuf> {
    if let Ok(rel) = source.strip_prefix(project_root) {
        return Some(rel.to_path_buf());
    }
    let source = source.canonicalize().ok()?;
    let project_root = project_root.canonicalize().ok()?;
    source.strip_prefix(&project_root).ok().map(Path::to_path_buf)
}

/// Checksum and size of a finished artifact. On failure the artifact is
/// removed so the run directory holds no unaccounted files.
pub(crate) async fn seal_artifact(path: &Path) -> std::result::Result<(String, u64), String> {
    let sealed = async {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| format!("cannot stat artifact {}: {}", path.display(), e))?
            .len();
        let checksum = sha256_file(path)
            .await
            .map_err(|e| format!("checksum failed for {}: {}", path.display(), e))?;
        Ok::<_, String>((checksum, size))
    }
    .await;
    if sealed.is_err() {
        remove_partial(path).await;
    }
    sealed
}

pub(crate) async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Removed partial artifact {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial artifact {}: {}", path.display(), e),
    }
}

/// Standalone database backup into `<backup_root>/database/`.
pub async fn create_backup(
    config: &EngineConfig,
    runner: &dyn ExternalToolRunner,
    compress: bool,
) -> DatabaseResult {
    let dest = config.storage.backup_root.join(DATABASE_BACKUP_DIR);
    database::backup_database(runner, &config.database, &dest, compress, &run_stamp(Utc::now())).await
}
