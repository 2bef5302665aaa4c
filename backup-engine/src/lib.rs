//! Backup Engine Library
//!
//! Parallel system backups (database, directories, container volumes) with
//! manifest-gated, snapshot-protected restores.

pub mod backup;
pub mod catalog;
pub mod config;
pub mod fs;
pub mod integrity;
pub mod restore;
pub mod tools;
pub mod utils;

// Re-export commonly used types
pub use backup::{create_backup, BackupRequest, ParallelBackupCoordinator};
pub use catalog::{list_backups, list_system_backups};
pub use config::EngineConfig;
pub use restore::{restore_system, RestoreCoordinator, RestoreReport, RestoreRequest};
pub use tools::{ExternalToolRunner, ProcessToolRunner};
pub use utils::errors::{EngineError, Result};
