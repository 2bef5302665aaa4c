//! Configuration management for the backup engine.
//!
//! Built once at the boundary from an optional TOML file with environment
//! variable overrides (`BACKUP_ENGINE__DATABASE__HOST=...`), then handed to
//! the coordinators. Nothing below the boundary reads ambient settings.

use crate::backup::manifest::ComponentKind;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "BACKUP_ENGINE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    /// Filesystem components keyed by component name.
    pub directories: BTreeMap<String, DirectorySource>,
    pub volumes: VolumeConfig,
    pub ignore: IgnoreConfig,
    pub backup: BackupConfig,
    pub tools: ToolsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root under which every run gets its own directory
    pub backup_root: PathBuf,

    /// Where pre-restore snapshots land (defaults to `<backup_root>/pre_restore_snapshots`)
    pub snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Database that is dumped and restored
    pub name: String,

    /// Database used for drop/create/terminate while `name` is unavailable
    pub maintenance_db: String,

    /// Extensions re-enabled after the database is recreated
    pub extensions: Vec<String>,

    /// Tables whose row counts are recorded at backup and compared after restore
    pub verify_tables: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySource {
    pub path: PathBuf,

    /// Paths (relative to `path`) that are copied even when ignore rules match
    pub always_include: Vec<String>,

    /// Globs that must match at least one file in the backed-up copy
    pub critical_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub names: Vec<String>,

    /// Image used for the throwaway archive/extract container
    pub helper_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Honour the project's `.gitignore` when copying directories
    pub respect_gitignore: bool,

    /// Directory holding the `.gitignore` (defaults to the current directory)
    pub project_root: Option<PathBuf>,

    /// Components copied without any ignore filtering
    pub exempt_components: Vec<String>,

    /// Patterns applied in addition to the `.gitignore`
    pub extra_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Size of the component worker pool
    pub workers: usize,
    pub database_timeout_secs: u64,
    pub directory_timeout_secs: u64,
    pub volume_timeout_secs: u64,
    pub compress: bool,
    pub verify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub pg_dump: String,
    pub psql: String,
    pub docker: String,

    /// Hard limit after which an external process is killed
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backup_root: PathBuf::from("backups"),
            snapshot_dir: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            name: "app".to_string(),
            maintenance_db: "postgres".to_string(),
            extensions: vec!["vector".to_string()],
            verify_tables: Vec::new(),
        }
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            names: Vec::new(),
            helper_image: "alpine:3".to_string(),
        }
    }
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            project_root: None,
            exempt_components: vec!["models".to_string()],
            extra_patterns: Vec::new(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            database_timeout_secs: 1800,
            directory_timeout_secs: 600,
            volume_timeout_secs: 900,
            compress: true,
            verify: true,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            pg_dump: "pg_dump".to_string(),
            psql: "psql".to_string(),
            docker: "docker".to_string(),
            timeout_secs: 3600,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("database.extensions")
                .with_list_parse_key("database.verify_tables")
                .with_list_parse_key("volumes.names")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let config: EngineConfig = settings
            .try_deserialize()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every run fail in the same way.
    pub fn validate(&self) -> Result<()> {
        if self.backup.workers == 0 {
            return Err(EngineError::Config("backup.workers must be at least 1".into()));
        }
        if self.database.name.is_empty() {
            return Err(EngineError::Config("database.name must not be empty".into()));
        }
        if self.database.name == self.database.maintenance_db {
            return Err(EngineError::Config(
                "database.maintenance_db must differ from database.name".into(),
            ));
        }
        Ok(())
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.storage
            .snapshot_dir
            .clone()
            .unwrap_or_else(|| self.storage.backup_root.join("pre_restore_snapshots"))
    }

    /// Directory holding the `.gitignore` consulted for filesystem components.
    pub fn project_root(&self) -> PathBuf {
        self.ignore
            .project_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

impl BackupConfig {
    /// Per-task timeout used by the backup coordinator.
    pub fn timeout_for(&self, kind: ComponentKind) -> Duration {
        let secs = match kind {
            ComponentKind::Database => self.database_timeout_secs,
            ComponentKind::Directory => self.directory_timeout_secs,
            ComponentKind::Volume => self.volume_timeout_secs,
        };
        Duration::from_secs(secs)
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
