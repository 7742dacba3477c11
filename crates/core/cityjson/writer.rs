//! Writing CityJSON documents to disk, optionally gzip compressed.

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::Value;

use crate::error::Result;

/// Compact JSON bytes of a document, gzip compressed when `gzip` is set.
pub fn encode(document: &Value, gzip: bool) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(document)?;
    if !gzip {
        return Ok(json);
    }
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// The path a document is written to: `.gz` is appended when compressing.
pub fn output_path(path: &Path, gzip: bool) -> PathBuf {
    if gzip {
        let mut name = path.as_os_str().to_owned();
        name.push(".gz");
        PathBuf::from(name)
    } else {
        path.to_path_buf()
    }
}

/// Write a document and return the path it was written to.
pub async fn write_document(path: &Path, document: &Value, gzip: bool) -> Result<PathBuf> {
    let bytes = encode(document, gzip)?;
    let path = output_path(path, gzip);
    tokio::fs::write(&path, bytes).await.map_err(|e| {
        log::error!("Invalid output file: {}\n{}", path.display(), e);
        e
    })?;
    Ok(path)
}
