//! Backup Engine - Main entry point
//!
//! Thin command line front end. Every command prints its structured result
//! as JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use backup_engine::{
    backup::{BackupRequest, ParallelBackupCoordinator},
    catalog, create_backup,
    restore::{RestoreCoordinator, RestoreRequest, LATEST},
    utils, EngineConfig, ExternalToolRunner, ProcessToolRunner,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up the database, directories and volumes in parallel
    Backup {
        /// Only these directory components (default: all configured)
        #[arg(long = "directory", value_name = "NAME")]
        directories: Vec<String>,

        /// Only these volumes (default: all configured)
        #[arg(long = "volume", value_name = "NAME")]
        volumes: Vec<String>,

        /// Leave the database out
        #[arg(long)]
        skip_database: bool,

        /// Store the dump uncompressed
        #[arg(long)]
        no_compress: bool,

        /// Skip post-backup verification
        #[arg(long)]
        no_verify: bool,
    },

    /// Restore a system backup
    Restore {
        /// Run directory, run name, or "latest"
        #[arg(default_value = LATEST)]
        backup: String,

        /// Restore only these components (repeatable)
        #[arg(long = "component", value_name = "NAME")]
        components: Vec<String>,

        /// Do not snapshot the database before overwriting it
        #[arg(long)]
        no_snapshot: bool,

        /// Continue when the pre-restore snapshot fails
        #[arg(long)]
        force: bool,

        /// Report what would be restored without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// List system backups
    List,

    /// Back up only the database
    DbBackup {
        #[arg(long)]
        no_compress: bool,
    },

    /// List standalone database backups
    DbList,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let config = EngineConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting backup-engine v{} (backup root: {})",
        env!("CARGO_PKG_VERSION"),
        config.storage.backup_root.display()
    );

    let config = Arc::new(config);
    let runner: Arc<dyn ExternalToolRunner> = Arc::new(ProcessToolRunner::new(config.tools.clone()));

    let ok = match args.command {
        Command::Backup {
            directories,
            volumes,
            skip_database,
            no_compress,
            no_verify,
        } => {
            let mut request = BackupRequest::all(&config);
            request.include_database = !skip_database;
            if !directories.is_empty() {
                request.directories = directories;
            }
            if !volumes.is_empty() {
                request.volumes = volumes;
            }
            request.compress = request.compress && !no_compress;
            request.verify = request.verify && !no_verify;

            let manifest = ParallelBackupCoordinator::new(Arc::clone(&config), runner)
                .run(&request)
                .await?;
            print_json(&manifest)?;
            manifest.failed_components().is_empty()
        }
        Command::Restore {
            backup,
            components,
            no_snapshot,
            force,
            dry_run,
        } => {
            let request = RestoreRequest {
                backup,
                components: (!components.is_empty()).then_some(components),
                create_snapshot: !no_snapshot,
                force,
                dry_run,
            };
            let report = RestoreCoordinator::new(Arc::clone(&config), runner)
                .restore(&request)
                .await?;
            print_json(&report)?;
            report.success
        }
        Command::List => {
            print_json(&catalog::list_system_backups(&config)?)?;
            true
        }
        Command::DbBackup { no_compress } => {
            let compress = config.backup.compress && !no_compress;
            let result = create_backup(&config, runner.as_ref(), compress).await;
            print_json(&result)?;
            result.errors.is_empty()
        }
        Command::DbList => {
            print_json(&catalog::list_backups(&config).await?)?;
            true
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
