//! External tool boundary.
//!
//! Every dump, SQL statement and container command goes through an
//! [`ExternalToolRunner`], so orchestration code never spawns processes
//! itself and can be driven by a fake in tests.

pub mod postgres;
pub mod process;

#[cfg(test)]
pub(crate) mod fake;

use crate::config::DatabaseConfig;
use crate::utils::errors::ToolError;
use async_trait::async_trait;
use std::path::Path;

pub use postgres::PostgresOps;
pub use process::ProcessToolRunner;

/// How a container command's standard streams are wired.
#[derive(Debug, Clone, Copy)]
pub enum ContainerIo<'a> {
    /// Capture stdout as text
    Capture,
    /// Feed the file at this path to stdin
    StdinFrom(&'a Path),
    /// Write stdout to the file at this path
    StdoutTo(&'a Path),
}

#[async_trait]
pub trait ExternalToolRunner: Send + Sync {
    /// Dump `db.name` as plain SQL into `dest`.
    async fn run_dump(&self, db: &DatabaseConfig, dest: &Path) -> Result<(), ToolError>;

    /// Apply the SQL file `sql_file` to `database`, stopping at the first error.
    async fn run_restore(
        &self,
        db: &DatabaseConfig,
        database: &str,
        sql_file: &Path,
    ) -> Result<(), ToolError>;

    /// Execute `sql` against `database`; returns tuples-only, unaligned output.
    async fn run_sql(&self, db: &DatabaseConfig, database: &str, sql: &str)
        -> Result<String, ToolError>;

    /// Run a container runtime command (`docker <args>`).
    async fn run_container_command(
        &self,
        args: &[String],
        io: ContainerIo<'_>,
    ) -> Result<String, ToolError>;
}
