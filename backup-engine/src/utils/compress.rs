//! Streaming gzip compression for dump artifacts.

use async_compression::tokio::bufread::GzipDecoder;
use async_compression::tokio::write::GzipEncoder;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};

/// Compress `src` into `dest`. Returns the compressed size in bytes.
pub async fn gzip_file(src: &Path, dest: &Path) -> std::io::Result<u64> {
    let mut reader = BufReader::new(File::open(src).await?);
    let mut encoder = GzipEncoder::new(BufWriter::new(File::create(dest).await?));
    tokio::io::copy_buf(&mut reader, &mut encoder).await?;
    encoder.shutdown().await?;
    Ok(tokio::fs::metadata(dest).await?.len())
}

/// Decompress `src` into `dest`. Returns the decompressed size in bytes.
pub async fn gunzip_file(src: &Path, dest: &Path) -> std::io::Result<u64> {
    let mut decoder = GzipDecoder::new(BufReader::new(File::open(src).await?));
    let mut writer = BufWriter::new(File::create(dest).await?);
    let bytes = tokio::io::copy(&mut decoder, &mut writer).await?;
    writer.flush().await?;
    Ok(bytes)
}

pub fn is_gzip_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}
