//! Error types for the backup engine.
//!
//! Expected per-component failures are not errors: they are recorded in the
//! component's result. `EngineError` covers pre-conditions that stop a run
//! before any work begins, plus the plumbing failures underneath them.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unknown component(s) requested: {}", .0.join(", "))]
    UnknownComponent(Vec<String>),

    #[error("Backup {0} holds no restorable components")]
    NothingToRestore(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Reasons a backup is refused before a restore touches anything.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Backup not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Malformed manifest: {0}")]
    Format(String),

    #[error("Unsupported manifest version: {0}")]
    Version(String),
}

/// Failure of an external tool invocation.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("I/O error while streaming to {program}: {source}")]
    Stream {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_component_message_lists_names() {
        let err = EngineError::UnknownComponent(vec!["nonexistent".into(), "other".into()]);
        assert_eq!(err.to_string(), "Unknown component(s) requested: nonexistent, other");
    }

    #[test]
    fn test_validation_converts_into_engine_error() {
        let err: EngineError = ValidationError::Version("3.0".into()).into();
        assert!(matches!(err, EngineError::Validation(ValidationError::Version(_))));
    }
}
