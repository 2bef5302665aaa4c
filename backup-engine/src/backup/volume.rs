//! Container volume backup.
//!
//! The archive is produced by a throwaway helper container that tars the
//! volume to stdout; the engine writes that stream straight to disk, so no
//! host-path translation is involved.

use super::manifest::{bytes_to_mb, VolumeResult};
use super::{remove_partial, seal_artifact};
use crate::tools::{ContainerIo, ExternalToolRunner};
use std::path::Path;
use tracing::{error, info, warn};

/// Mount point of the volume inside the helper container.
pub const HELPER_MOUNT: &str = "/volume";

pub fn inspect_args(volume: &str) -> Vec<String> {
    vec!["volume".into(), "inspect".into(), volume.into()]
}

pub async fn volume_exists(runner: &dyn ExternalToolRunner, volume: &str) -> bool {
    runner
        .run_container_command(&inspect_args(volume), ContainerIo::Capture)
        .await
        .is_ok()
}

/// Archive `volume` into `<dest_dir>/<volume>_<stamp>.tar.gz`.
pub async fn backup_docker_volume(
    runner: &dyn ExternalToolRunner,
    helper_image: &str,
    volume: &str,
    dest_dir: &Path,
    stamp: &str,
) -> VolumeResult {
    if !volume_exists(runner, volume).await {
        warn!(volume, "Volume does not exist, skipping");
        return VolumeResult::failed(volume, format!("volume {} does not exist", volume));
    }

    if let Err(e) = tokio::fs::create_dir_all(dest_dir).await {
        return VolumeResult::failed(volume, format!("cannot create {}: {}", dest_dir.display(), e));
    }

    let filename = format!("{}_{}.tar.gz", volume, stamp);
    let archive = dest_dir.join(&filename);
    let args: Vec<String> = vec![
        "run".into(),
        "--rm".into(),
        "-v".into(),
        format!("{}:{}:ro", volume, HELPER_MOUNT),
        helper_image.into(),
        "tar".into(),
        "czf".into(),
        "-".into(),
        "-C".into(),
        HELPER_MOUNT.into(),
        ".".into(),
    ];

    info!(volume, "Archiving volume to {}", archive.display());
    if let Err(e) = runner
        .run_container_command(&args, ContainerIo::StdoutTo(&archive))
        .await
    {
        error!(volume, "Volume archive failed: {}", e);
        remove_partial(&archive).await;
        return VolumeResult::failed(volume, format!("volume archive failed: {}", e));
    }

    let (checksum, size) = match seal_artifact(&archive).await {
        Ok(sealed) => sealed,
        Err(reason) => {
            error!(volume, "{}", reason);
            return VolumeResult::failed(volume, reason);
        }
    };

    info!(volume, size_bytes = size, "Volume backup complete");
    VolumeResult {
        volume: volume.to_string(),
        filename,
        filepath: archive,
        size_mb: bytes_to_mb(size),
        checksum,
        errors: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::fake::FakeToolRunner;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_volume_backup() {
        let temp_dir = TempDir::new().unwrap();
        let runner = FakeToolRunner::new().with_volume("pgdata", b"tarball bytes", &["c1"]);

        let result = backup_docker_volume(&runner, "alpine:3", "pgdata", temp_dir.path(), "s").await;
        assert!(result.errors.is_empty());
        assert_eq!(result.filename, "pgdata_s.tar.gz");
        assert_eq!(std::fs::read(&result.filepath).unwrap(), b"tarball bytes");
        assert_eq!(result.checksum.len(), 64);
    }

    #[tokio::test]
    async fn test_missing_volume_fails_fast() {
        let temp_dir = TempDir::new().unwrap();
        let runner = FakeToolRunner::new();

        let result = backup_docker_volume(&runner, "alpine:3", "ghost", temp_dir.path(), "s").await;
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("does not exist"));
        // Only the inspect call was made
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_archive_is_removed() {
        let temp_dir = TempDir::new().unwrap();
        let runner = FakeToolRunner::new().with_volume("pgdata", b"x", &[]);
        runner.fail_container_verb("run");

        let result = backup_docker_volume(&runner, "alpine:3", "pgdata", temp_dir.path(), "s").await;
        assert!(!result.errors.is_empty());
        assert!(!temp_dir.path().join("pgdata_s.tar.gz").exists());
    }
}
