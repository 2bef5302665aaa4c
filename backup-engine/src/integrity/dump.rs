//! Structural sanity checks for SQL dump artifacts.

use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

/// Markers found at the top of a dump (custom format, plain format).
const DUMP_MARKERS: &[&str] = &["PGDMP", "PostgreSQL database dump"];

/// Statements of which at least one must open a line of a usable plain dump.
/// pg_dump always writes keywords upper-case.
const DUMP_STATEMENTS: &[&str] = &["CREATE ", "COPY ", "INSERT "];

/// How far into the file to look for an opening marker.
const HEADER_BYTES: u64 = 4096;

/// Check that `path` exists, is non-empty, and looks like a database dump.
/// Returns the reason on failure.
pub async fn validate_dump_artifact(path: &Path) -> Result<(), String> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| format!("dump file missing: {} ({})", path.display(), e))?;

    if metadata.len() == 0 {
        return Err(format!("dump file is empty: {}", path.display()));
    }

    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| format!("cannot open dump {}: {}", path.display(), e))?;

    let mut header = Vec::new();
    file.take(HEADER_BYTES)
        .read_to_end(&mut header)
        .await
        .map_err(|e| format!("cannot read dump {}: {}", path.display(), e))?;
    let header = String::from_utf8_lossy(&header);
    if DUMP_MARKERS.iter().any(|m| header.contains(m)) {
        return Ok(());
    }

    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| format!("cannot open dump {}: {}", path.display(), e))?;
    let mut lines = BufReader::new(file).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let statement = line.trim_start();
                if DUMP_STATEMENTS.iter().any(|s| statement.starts_with(s)) {
                    return Ok(());
                }
            }
            Ok(None) => break,
            // Binary content that is not UTF-8 and carries no marker
            Err(_) => break,
        }
    }

    Err(format!(
        "dump file has no dump header and no CREATE/COPY/INSERT statements: {}",
        path.display()
    ))
}
