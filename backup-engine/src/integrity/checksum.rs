//! Streaming SHA-256 checksums.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

const BUFFER_SIZE: usize = 64 * 1024;

/// Hex SHA-256 of the file at `path`, read in fixed-size chunks.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
