//! Subprocess-backed tool runner.
//!
//! Every child is spawned with `kill_on_drop`, and waiting on it is bounded
//! by the configured timeout: when the timeout fires the wait future is
//! dropped, which kills the process instead of leaving it running behind a
//! coordinator that already gave up on it.

use super::{ContainerIo, ExternalToolRunner};
use crate::config::{DatabaseConfig, ToolsConfig};
use crate::utils::errors::ToolError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub struct ProcessToolRunner {
    tools: ToolsConfig,
}

impl ProcessToolRunner {
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }

    fn timeout(&self) -> Duration {
        self.tools.timeout()
    }

    fn pg_command(&self, program: &str, db: &DatabaseConfig, database: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-h")
            .arg(&db.host)
            .arg("-p")
            .arg(db.port.to_string())
            .arg("-U")
            .arg(&db.user)
            .arg("-d")
            .arg(database);
        if let Some(password) = &db.password {
            cmd.env("PGPASSWORD", password);
        }
        cmd
    }

    /// Spawn, wait (bounded), and map a non-zero exit to `ToolError::Failed`.
    async fn execute(
        &self,
        program: &str,
        mut cmd: Command,
        stdin: Stdio,
        stdout: Stdio,
    ) -> Result<String, ToolError> {
        cmd.stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program, "Spawning external tool");
        let child = cmd.spawn().map_err(|source| ToolError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let output = match tokio::time::timeout(self.timeout(), child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ToolError::Stream {
                program: program.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(ToolError::Timeout {
                    program: program.to_string(),
                    timeout: self.timeout(),
                })
            }
        };

        if !output.status.success() {
            return Err(ToolError::Failed {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn file_stdio(program: &str, file: std::io::Result<std::fs::File>) -> Result<Stdio, ToolError> {
    file.map(Stdio::from).map_err(|source| ToolError::Stream {
        program: program.to_string(),
        source,
    })
}

#[async_trait]
impl ExternalToolRunner for ProcessToolRunner {
    async fn run_dump(&self, db: &DatabaseConfig, dest: &Path) -> Result<(), ToolError> {
        let program = self.tools.pg_dump.as_str();
        let mut cmd = self.pg_command(program, db, &db.name);
        cmd.args(["--no-owner", "--no-privileges", "--format=plain", "-f"])
            .arg(dest);
        self.execute(program, cmd, Stdio::null(), Stdio::null()).await?;
        Ok(())
    }

    async fn run_restore(
        &self,
        db: &DatabaseConfig,
        database: &str,
        sql_file: &Path,
    ) -> Result<(), ToolError> {
        let program = self.tools.psql.as_str();
        let mut cmd = self.pg_command(program, db, database);
        cmd.args(["-q", "-v", "ON_ERROR_STOP=1", "-f"]).arg(sql_file);
        self.execute(program, cmd, Stdio::null(), Stdio::null()).await?;
        Ok(())
    }

    async fn run_sql(
        &self,
        db: &DatabaseConfig,
        database: &str,
        sql: &str,
    ) -> Result<String, ToolError> {
        let program = self.tools.psql.as_str();
        let mut cmd = self.pg_command(program, db, database);
        cmd.args(["-t", "-A", "-q", "-v", "ON_ERROR_STOP=1", "-c", sql]);
        self.execute(program, cmd, Stdio::null(), Stdio::piped()).await
    }

    async fn run_container_command(
        &self,
        args: &[String],
        io: ContainerIo<'_>,
    ) -> Result<String, ToolError> {
        let program = self.tools.docker.as_str();
        let mut cmd = Command::new(program);
        cmd.args(args);

        let (stdin, stdout) = match io {
            ContainerIo::Capture => (Stdio::null(), Stdio::piped()),
            ContainerIo::StdinFrom(path) => {
                (file_stdio(program, std::fs::File::open(path))?, Stdio::piped())
            }
            ContainerIo::StdoutTo(path) => {
                (Stdio::null(), file_stdio(program, std::fs::File::create(path))?)
            }
        };

        self.execute(program, cmd, stdin, stdout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let runner = ProcessToolRunner::new(ToolsConfig {
            docker: "/nonexistent/docker-binary".to_string(),
            ..ToolsConfig::default()
        });
        let err = runner
            .run_container_command(&["ps".to_string()], ContainerIo::Capture)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_long_running_process() {
        let runner = ProcessToolRunner::new(ToolsConfig {
            docker: "sleep".to_string(),
            timeout_secs: 1,
            ..ToolsConfig::default()
        });
        let started = std::time::Instant::now();
        let err = runner
            .run_container_command(&["30".to_string()], ContainerIo::Capture)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let runner = ProcessToolRunner::new(ToolsConfig {
            docker: "false".to_string(),
            ..ToolsConfig::default()
        });
        let err = runner
            .run_container_command(&[], ContainerIo::Capture)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_to_file() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::TempDir::new()?;
        let out = temp_dir.path().join("out.txt");
        let runner = ProcessToolRunner::new(ToolsConfig {
            docker: "echo".to_string(),
            ..ToolsConfig::default()
        });
        runner
            .run_container_command(&["hello".to_string()], ContainerIo::StdoutTo(&out))
            .await?;
        assert_eq!(std::fs::read_to_string(&out)?, "hello\n");
        Ok(())
    }
}
