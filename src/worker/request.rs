// src/worker/request.rs

//! Files exchanged with worker processes
//!
//! The supervisor writes a `WorkerRequest` into each worker's scratch
//! directory; the worker answers with a `WorkerReport` once its fragment
//! files are complete. Both are versioned JSON.

use crate::config::ExtractOptions;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Version of the request/report format
pub const PROTOCOL_VERSION: u32 = 1;

/// Request file name inside a worker's scratch directory
pub const REQUEST_FILE: &str = "request.json";

/// Completion marker written last by a worker
pub const REPORT_FILE: &str = "done.json";

/// Everything a worker needs to extract its chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub version: u32,
    /// Position of this worker's chunk
    pub worker: usize,
    /// Base directory the package paths are relative to
    pub package_dir: PathBuf,
    /// Directory receiving the fragment files
    pub output_dir: PathBuf,
    /// Relative package paths, in chunk order
    pub packages: Vec<String>,
    pub options: ExtractOptions,
}

impl WorkerRequest {
    pub fn new(
        worker: usize,
        package_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        packages: Vec<String>,
        options: ExtractOptions,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            worker,
            package_dir: package_dir.into(),
            output_dir: output_dir.into(),
            packages,
            options,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let request: Self = load_json(path)?;
        check_version(request.version, path)?;
        Ok(request)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }
}

/// Outcome of one worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub version: u32,
    /// Packages whose fragments were written
    pub written: usize,
    /// Packages that could not be extracted
    pub failed: Vec<String>,
}

impl WorkerReport {
    pub fn new() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let report: Self = load_json(path)?;
        check_version(report.version, path)?;
        Ok(report)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::WorkerProcess(format!("Cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| Error::WorkerProcess(format!("Malformed {}: {}", path.display(), e)))
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| Error::WorkerProcess(format!("Cannot encode {}: {}", path.display(), e)))?;
    fs::write(path, content).map_err(|e| Error::document(path, e))
}

fn check_version(version: u32, path: &Path) -> Result<()> {
    if version != PROTOCOL_VERSION {
        return Err(Error::WorkerProcess(format!(
            "{} has protocol version {}, expected {}",
            path.display(),
            version,
            PROTOCOL_VERSION
        )));
    }
    Ok(())
}
