//! Recording fake of the external tool boundary, used by unit tests.

use super::{ContainerIo, ExternalToolRunner};
use crate::config::DatabaseConfig;
use crate::utils::errors::ToolError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const VALID_DUMP: &[u8] = b"--\n-- PostgreSQL database dump\n--\n\nCREATE TABLE articles (id integer);\nCOPY articles (id) FROM stdin;\n1\n\\.\n";

#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Dump { dest: PathBuf },
    Restore { database: String, file: PathBuf },
    Sql { database: String, sql: String },
    Container { args: Vec<String> },
}

impl ToolCall {
    /// Calls that change live database or volume state.
    pub fn is_destructive(&self) -> bool {
        match self {
            ToolCall::Dump { .. } => false,
            ToolCall::Restore { .. } => true,
            ToolCall::Sql { sql, .. } => {
                let upper = sql.to_uppercase();
                upper.starts_with("DROP")
                    || upper.starts_with("CREATE DATABASE")
                    || upper.contains("PG_TERMINATE_BACKEND")
            }
            ToolCall::Container { args } => match args.first().map(String::as_str) {
                Some("stop") => true,
                Some("volume") => matches!(args.get(1).map(String::as_str), Some("rm" | "create")),
                Some("run") => args.iter().any(|a| a == "-i"),
                _ => false,
            },
        }
    }
}

fn failed(program: &str, stderr: &str) -> ToolError {
    ToolError::Failed {
        program: program.to_string(),
        status: "exit status: 1".to_string(),
        stderr: stderr.to_string(),
    }
}

fn volume_arg(args: &[String]) -> Option<String> {
    let idx = args.iter().position(|a| a == "-v")?;
    args.get(idx + 1)?.split(':').next().map(str::to_string)
}

pub struct FakeToolRunner {
    calls: Mutex<Vec<ToolCall>>,
    dump_content: Mutex<Option<Vec<u8>>>,
    failing_restores: AtomicUsize,
    restored: Mutex<Vec<Vec<u8>>>,
    unreachable: AtomicBool,
    failing_sql: Mutex<Vec<String>>,
    row_counts: Mutex<BTreeMap<String, u64>>,
    volumes: Mutex<BTreeMap<String, Vec<u8>>>,
    mounted: Mutex<BTreeMap<String, Vec<String>>>,
    failing_container_verb: Mutex<Option<String>>,
    dump_delay: Mutex<Option<Duration>>,
}

impl FakeToolRunner {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            dump_content: Mutex::new(Some(VALID_DUMP.to_vec())),
            failing_restores: AtomicUsize::new(0),
            restored: Mutex::new(Vec::new()),
            unreachable: AtomicBool::new(false),
            failing_sql: Mutex::new(Vec::new()),
            row_counts: Mutex::new(BTreeMap::new()),
            volumes: Mutex::new(BTreeMap::new()),
            mounted: Mutex::new(BTreeMap::new()),
            failing_container_verb: Mutex::new(None),
            dump_delay: Mutex::new(None),
        }
    }

    pub fn with_row_count(self, table: &str, count: u64) -> Self {
        self.row_counts.lock().unwrap().insert(table.to_string(), count);
        self
    }

    pub fn with_volume(self, name: &str, archive: &[u8], containers: &[&str]) -> Self {
        self.volumes.lock().unwrap().insert(name.to_string(), archive.to_vec());
        self.mounted.lock().unwrap().insert(
            name.to_string(),
            containers.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// `None` makes every dump fail.
    pub fn set_dump_content(&self, content: Option<&[u8]>) {
        *self.dump_content.lock().unwrap() = content.map(<[u8]>::to_vec);
    }

    /// Make every dump take this long before producing output.
    pub fn set_dump_delay(&self, delay: Duration) {
        *self.dump_delay.lock().unwrap() = Some(delay);
    }

    /// The next `n` SQL file loads fail.
    pub fn fail_next_restores(&self, n: usize) {
        self.failing_restores.store(n, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Any SQL containing `fragment` (case-insensitive) fails.
    pub fn fail_sql_containing(&self, fragment: &str) {
        self.failing_sql.lock().unwrap().push(fragment.to_uppercase());
    }

    pub fn fail_container_verb(&self, verb: &str) {
        *self.failing_container_verb.lock().unwrap() = Some(verb.to_string());
    }

    pub fn set_row_count(&self, table: &str, count: u64) {
        self.row_counts.lock().unwrap().insert(table.to_string(), count);
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn destructive_calls(&self) -> Vec<ToolCall> {
        self.calls().into_iter().filter(ToolCall::is_destructive).collect()
    }

    /// Contents of each SQL file handed to `run_restore`, successful or not.
    pub fn restored(&self) -> Vec<Vec<u8>> {
        self.restored.lock().unwrap().clone()
    }

    pub fn volume_content(&self, name: &str) -> Option<Vec<u8>> {
        self.volumes.lock().unwrap().get(name).cloned()
    }

    fn record(&self, call: ToolCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ExternalToolRunner for FakeToolRunner {
    async fn run_dump(&self, _db: &DatabaseConfig, dest: &std::path::Path) -> Result<(), ToolError> {
        self.record(ToolCall::Dump { dest: dest.to_path_buf() });
        let delay = *self.dump_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(failed("pg_dump", "could not connect to server"));
        }
        let content = self.dump_content.lock().unwrap().clone();
        match content {
            Some(bytes) => {
                std::fs::write(dest, bytes).map_err(|source| ToolError::Stream {
                    program: "pg_dump".to_string(),
                    source,
                })
            }
            None => Err(failed("pg_dump", "dump failed")),
        }
    }

    async fn run_restore(
        &self,
        _db: &DatabaseConfig,
        database: &str,
        sql_file: &std::path::Path,
    ) -> Result<(), ToolError> {
        self.record(ToolCall::Restore {
            database: database.to_string(),
            file: sql_file.to_path_buf(),
        });
        let content = std::fs::read(sql_file).unwrap_or_default();
        self.restored.lock().unwrap().push(content);

        let remaining = self.failing_restores.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_restores.store(remaining - 1, Ordering::SeqCst);
            return Err(failed("psql", "ERROR: syntax error at or near \"garbage\""));
        }
        Ok(())
    }

    async fn run_sql(
        &self,
        _db: &DatabaseConfig,
        database: &str,
        sql: &str,
    ) -> Result<String, ToolError> {
        self.record(ToolCall::Sql {
            database: database.to_string(),
            sql: sql.to_string(),
        });
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(failed("psql", "could not connect to server"));
        }
        let upper = sql.to_uppercase();
        if self.failing_sql.lock().unwrap().iter().any(|f| upper.contains(f)) {
            return Err(failed("psql", "ERROR: permission denied"));
        }

        if let Some(table) = sql
            .strip_prefix("SELECT count(*) FROM \"")
            .and_then(|rest| rest.strip_suffix('"'))
        {
            return match self.row_counts.lock().unwrap().get(table) {
                Some(n) => Ok(format!("{}\n", n)),
                None => Err(failed("psql", "ERROR: relation does not exist")),
            };
        }
        if upper.contains("INFORMATION_SCHEMA.TABLES") {
            return Ok(format!("{}\n", self.row_counts.lock().unwrap().len()));
        }
        Ok("1\n".to_string())
    }

    async fn run_container_command(
        &self,
        args: &[String],
        io: ContainerIo<'_>,
    ) -> Result<String, ToolError> {
        self.record(ToolCall::Container { args: args.to_vec() });

        let verb = args.first().cloned().unwrap_or_default();
        let sub = args.get(1).cloned().unwrap_or_default();
        let failing = self.failing_container_verb.lock().unwrap().clone();
        if failing.as_deref() == Some(verb.as_str()) {
            if let ContainerIo::StdoutTo(path) = io {
                let _ = std::fs::write(path, b"partial");
            }
            return Err(failed("docker", "container runtime error"));
        }

        match (verb.as_str(), sub.as_str()) {
            ("volume", "inspect") => {
                let name = args.get(2).cloned().unwrap_or_default();
                if self.volumes.lock().unwrap().contains_key(&name) {
                    Ok("[{}]\n".to_string())
                } else {
                    Err(failed("docker", "Error: No such volume"))
                }
            }
            ("volume", "rm") => {
                let name = args.get(2).cloned().unwrap_or_default();
                self.volumes.lock().unwrap().remove(&name);
                Ok(String::new())
            }
            ("volume", "create") => {
                let name = args.get(2).cloned().unwrap_or_default();
                self.volumes.lock().unwrap().insert(name.clone(), Vec::new());
                Ok(format!("{}\n", name))
            }
            ("ps", _) => {
                let name = args
                    .iter()
                    .find_map(|a| a.strip_prefix("volume="))
                    .unwrap_or_default()
                    .to_string();
                let ids = self.mounted.lock().unwrap().get(&name).cloned().unwrap_or_default();
                Ok(ids.iter().map(|id| format!("{}\n", id)).collect())
            }
            ("stop", _) | ("start", _) => Ok(String::new()),
            ("run", _) => {
                let name = volume_arg(args).unwrap_or_default();
                match io {
                    ContainerIo::StdoutTo(path) => {
                        let content = self.volumes.lock().unwrap().get(&name).cloned();
                        let content = content.ok_or_else(|| failed("docker", "no such volume"))?;
                        std::fs::write(path, content).map_err(|source| ToolError::Stream {
                            program: "docker".to_string(),
                            source,
                        })?;
                        Ok(String::new())
                    }
                    ContainerIo::StdinFrom(path) => {
                        let content = std::fs::read(path).map_err(|source| ToolError::Stream {
                            program: "docker".to_string(),
                            source,
                        })?;
                        self.volumes.lock().unwrap().insert(name, content);
                        Ok(String::new())
                    }
                    ContainerIo::Capture => Ok(String::new()),
                }
            }
            _ => Ok(String::new()),
        }
    }
}
