// src/error.rs

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Per-package failures
///
/// These never abort a run: the caller reports the package and moves on
/// to the next one.
#[derive(Error, Debug)]
pub enum PackageError {
    /// The archive could not be parsed as a package (bad magic, corrupt or
    /// truncated header, unreadable file)
    #[error("Unable to open package {path}: {reason}")]
    Open { path: String, reason: String },

    /// No whole-package digest could be produced
    #[error("Unable to checksum package {path}: {reason}")]
    MissingIdentity { path: String, reason: String },
}

impl PackageError {
    pub fn open(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Self::Open {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn missing_identity(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Self::MissingIdentity {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Package identifier the failure refers to
    pub fn path(&self) -> &str {
        match self {
            Self::Open { path, .. } | Self::MissingIdentity { path, .. } => path,
        }
    }
}

/// Fatal error types for a repogen run
///
/// Any of these terminates the run and leaves the previously published
/// metadata directory untouched.
#[derive(Error, Debug)]
pub enum Error {
    /// An output document could not be created, written or closed
    #[error("Metadata document error on {path}: {source}")]
    DocumentIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The atomic directory swap failed
    #[error("Failed to publish metadata: {0}")]
    Publish(String),

    /// A worker process exited abnormally or left incomplete output
    #[error("Worker process failed: {0}")]
    WorkerProcess(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed XML in an existing metadata document
    #[error("XML error: {0}")]
    Xml(String),

    /// Invalid run configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required file or directory does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn document(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DocumentIo {
            path: path.into(),
            source,
        }
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

/// Result type alias using repogen's fatal Error type
pub type Result<T> = std::result::Result<T, Error>;
