//! JSON sidecars: upstream metadata files and per-run manifests.

use super::csv_sink::ensure_parent;
use crate::error::DataError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Write any serializable value as pretty JSON.
pub fn write_json<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<(), DataError> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).map_err(|e| DataError::io(path, e))
}

/// Describes one CSV produced by a job run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunManifest {
    pub source: String,
    /// Endpoint with credentials redacted.
    pub endpoint: String,
    pub output: PathBuf,
    pub columns: Vec<String>,
    pub rows: usize,
    pub requests: usize,
    /// BLAKE3 hash of the CSV bytes as written.
    pub data_hash: String,
    pub fetched_at: DateTime<Utc>,
}

impl RunManifest {
    /// Build a manifest for a finished CSV, hashing its contents.
    pub fn for_csv(
        source: &str,
        endpoint: &str,
        output: &Path,
        columns: &[String],
        rows: usize,
        requests: usize,
    ) -> Result<Self, DataError> {
        let bytes = std::fs::read(output).map_err(|e| DataError::io(output, e))?;
        Ok(Self {
            source: source.to_string(),
            endpoint: endpoint.to_string(),
            output: output.to_path_buf(),
            columns: columns.to_vec(),
            rows,
            requests,
            data_hash: blake3::hash(&bytes).to_hex().to_string(),
            fetched_at: Utc::now(),
        })
    }

    /// Sidecar path: `<output>.manifest.json`.
    pub fn sidecar_path(output: &Path) -> PathBuf {
        let mut name = output.file_name().unwrap_or_default().to_os_string();
        name.push(".manifest.json");
        output.with_file_name(name)
    }

    pub fn write(&self) -> Result<PathBuf, DataError> {
        let path = Self::sidecar_path(&self.output);
        write_json(&path, self)?;
        Ok(path)
    }
}
