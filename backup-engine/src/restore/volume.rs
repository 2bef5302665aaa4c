//! Container volume restore.
//!
//! Containers mounting the volume are stopped, the volume is recreated and
//! the archive is piped into a helper container's stdin. Stopped containers
//! are started again whatever happened in between.

use super::ComponentOutcome;
use crate::backup::manifest::{ComponentKind, VolumeResult};
use crate::backup::volume::{volume_exists, HELPER_MOUNT};
use crate::integrity::sha256_file;
use crate::tools::{ContainerIo, ExternalToolRunner};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Archive of `result`, looked up in `run_dir` first so a relocated backup
/// still restores.
pub fn archive_path(run_dir: &Path, result: &VolumeResult) -> PathBuf {
    let local = run_dir.join(&result.filename);
    if local.is_file() || result.filepath.as_os_str().is_empty() {
        local
    } else {
        result.filepath.clone()
    }
}

pub struct VolumeRestorer<'a> {
    runner: &'a dyn ExternalToolRunner,
    helper_image: &'a str,
}

impl<'a> VolumeRestorer<'a> {
    pub fn new(runner: &'a dyn ExternalToolRunner, helper_image: &'a str) -> Self {
        Self { runner, helper_image }
    }

    pub async fn restore(&self, volume: &str, archive: &Path, checksum: &str, dry_run: bool) -> ComponentOutcome {
        if !archive.is_file() {
            return ComponentOutcome::failed(
                ComponentKind::Volume,
                format!("volume archive not found: {}", archive.display()),
            );
        }
        if !checksum.is_empty() {
            match sha256_file(archive).await {
                Ok(actual) if actual == checksum => {}
                Ok(_) => {
                    return ComponentOutcome::failed(
                        ComponentKind::Volume,
                        format!("checksum mismatch for {}", archive.display()),
                    )
                }
                Err(e) => {
                    return ComponentOutcome::failed(
                        ComponentKind::Volume,
                        format!("cannot checksum {}: {}", archive.display(), e),
                    )
                }
            }
        }

        let containers = match self.containers_using(volume).await {
            Ok(ids) => ids,
            Err(message) => return ComponentOutcome::failed(ComponentKind::Volume, message),
        };

        if dry_run {
            return ComponentOutcome::ok(
                ComponentKind::Volume,
                format!(
                    "would recreate volume {} from {} (stopping {} containers)",
                    volume,
                    archive.display(),
                    containers.len()
                ),
            );
        }

        let mut outcome = match self.stop(&containers).await {
            Err(message) => ComponentOutcome::failed(ComponentKind::Volume, message),
            Ok(()) => match self.replace(volume, archive).await {
                Ok(()) => ComponentOutcome::ok(
                    ComponentKind::Volume,
                    format!("volume {} restored from {}", volume, archive.display()),
                ),
                Err(message) => ComponentOutcome::failed(ComponentKind::Volume, message),
            },
        };

        for id in &containers {
            if let Err(e) = self
                .runner
                .run_container_command(&args(&["start", id]), ContainerIo::Capture)
                .await
            {
                let message = format!("could not restart container {}: {}", id, e);
                warn!(volume, "{}", message);
                outcome.warnings.push(message);
            }
        }

        if outcome.success {
            info!(volume, "{}", outcome.message);
        } else {
            error!(volume, "{}", outcome.message);
        }
        outcome
    }

    async fn containers_using(&self, volume: &str) -> Result<Vec<String>, String> {
        let filter = format!("volume={}", volume);
        let out = self
            .runner
            .run_container_command(&args(&["ps", "-q", "--filter", &filter]), ContainerIo::Capture)
            .await
            .map_err(|e| format!("cannot list containers using {}: {}", volume, e))?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn stop(&self, containers: &[String]) -> Result<(), String> {
        if containers.is_empty() {
            return Ok(());
        }
        let mut cmd = args(&["stop"]);
        cmd.extend(containers.iter().cloned());
        self.runner
            .run_container_command(&cmd, ContainerIo::Capture)
            .await
            .map(|_| ())
            .map_err(|e| format!("cannot stop containers: {}", e))
    }

    async fn replace(&self, volume: &str, archive: &Path) -> Result<(), String> {
        if volume_exists(self.runner, volume).await {
            self.runner
                .run_container_command(&args(&["volume", "rm", volume]), ContainerIo::Capture)
                .await
                .map_err(|e| format!("cannot remove volume {}: {}", volume, e))?;
        }
        self.runner
            .run_container_command(&args(&["volume", "create", volume]), ContainerIo::Capture)
            .await
            .map_err(|e| format!("cannot create volume {}: {}", volume, e))?;

        let mount = format!("{}:{}", volume, HELPER_MOUNT);
        let load = args(&[
            "run",
            "--rm",
            "-i",
            "-v",
            &mount,
            self.helper_image,
            "tar",
            "xzf",
            "-",
            "-C",
            HELPER_MOUNT,
        ]);
        self.runner
            .run_container_command(&load, ContainerIo::StdinFrom(archive))
            .await
            .map(|_| ())
            .map_err(|e| format!("cannot load archive into {}: {}", volume, e))
    }
}
