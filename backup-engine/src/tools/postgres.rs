//! Database operations expressed on top of an [`ExternalToolRunner`].

use super::ExternalToolRunner;
use crate::config::DatabaseConfig;
use crate::utils::errors::ToolError;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

pub struct PostgresOps<'a> {
    runner: &'a dyn ExternalToolRunner,
    db: &'a DatabaseConfig,
}

impl<'a> PostgresOps<'a> {
    pub fn new(runner: &'a dyn ExternalToolRunner, db: &'a DatabaseConfig) -> Self {
        Self { runner, db }
    }

    pub fn database(&self) -> &str {
        &self.db.name
    }

    /// Server reachable through the maintenance database?
    pub async fn ping(&self) -> Result<(), ToolError> {
        self.runner
            .run_sql(self.db, &self.db.maintenance_db, "SELECT 1")
            .await
            .map(|_| ())
    }

    /// Target database itself accepts connections?
    pub async fn ping_target(&self) -> Result<(), ToolError> {
        self.runner
            .run_sql(self.db, &self.db.name, "SELECT 1")
            .await
            .map(|_| ())
    }

    pub async fn dump(&self, dest: &Path) -> Result<(), ToolError> {
        self.runner.run_dump(self.db, dest).await
    }

    pub async fn load(&self, sql_file: &Path) -> Result<(), ToolError> {
        self.runner.run_restore(self.db, &self.db.name, sql_file).await
    }

    pub async fn terminate_connections(&self) -> Result<(), ToolError> {
        let sql = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = {} AND pid <> pg_backend_pid()",
            quote_literal(&self.db.name)
        );
        self.runner
            .run_sql(self.db, &self.db.maintenance_db, &sql)
            .await
            .map(|_| ())
    }

    pub async fn drop_database(&self) -> Result<(), ToolError> {
        let sql = format!("DROP DATABASE IF EXISTS {}", quote_ident(&self.db.name));
        self.runner
            .run_sql(self.db, &self.db.maintenance_db, &sql)
            .await
            .map(|_| ())
    }

    pub async fn create_database(&self) -> Result<(), ToolError> {
        let sql = format!("CREATE DATABASE {}", quote_ident(&self.db.name));
        self.runner
            .run_sql(self.db, &self.db.maintenance_db, &sql)
            .await
            .map(|_| ())
    }

    /// Idempotently enable each configured extension in the target database.
    pub async fn ensure_extensions(&self) -> Result<(), ToolError> {
        for extension in &self.db.extensions {
            let sql = format!("CREATE EXTENSION IF NOT EXISTS {}", quote_ident(extension));
            self.runner.run_sql(self.db, &self.db.name, &sql).await?;
        }
        Ok(())
    }

    /// Number of user tables in the `public` schema.
    pub async fn table_count(&self) -> Result<u64, ToolError> {
        let out = self
            .runner
            .run_sql(
                self.db,
                &self.db.name,
                "SELECT count(*) FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
            )
            .await?;
        Ok(parse_count(&out).unwrap_or(0))
    }

    /// Row counts for `tables`. Tables that cannot be counted are left out.
    pub async fn row_counts(&self, tables: &[String]) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for table in tables {
            let sql = format!("SELECT count(*) FROM {}", quote_ident(table));
            match self.runner.run_sql(self.db, &self.db.name, &sql).await {
                Ok(out) => match parse_count(&out) {
                    Some(n) => {
                        counts.insert(table.clone(), n);
                    }
                    None => warn!(table = %table, "Unparseable row count: {:?}", out.trim()),
                },
                Err(e) => warn!(table = %table, "Row count failed: {}", e),
            }
        }
        counts
    }
}

fn parse_count(out: &str) -> Option<u64> {
    out.lines().find(|l| !l.trim().is_empty())?.trim().parse().ok()
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
