// src/cache.rs

//! Content-addressed checksum cache
//!
//! Each entry is a one-line file under the cache directory whose name is
//! derived from the package basename, a digest of its signature block, its
//! size and its mtime. An entry is trusted only while the package mtime is
//! not newer than the entry file itself and its content is a complete digest
//! of the configured type. Entries are written to a temporary file and
//! renamed into place. Entries are never removed here.

use crate::checksum::ChecksumType;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Failure to read or write a cache entry
///
/// Never fatal: callers fall back to computing the digest directly.
#[derive(Error, Debug)]
#[error("Checksum cache error on {path}: {source}")]
pub struct CacheError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Identity of a package file for cache purposes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub basename: String,
    /// Digest of the embedded signature blobs, empty when there are none
    pub signature_key: String,
    pub size: u64,
    pub mtime: u64,
}

impl CacheKey {
    /// File name of the entry inside the cache directory
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.basename, self.signature_key, self.size, self.mtime
        )
    }
}

/// Checksum cache rooted at a directory
#[derive(Debug, Clone)]
pub struct ChecksumCache {
    dir: PathBuf,
    kind: ChecksumType,
}

impl ChecksumCache {
    pub fn new(dir: impl Into<PathBuf>, kind: ChecksumType) -> Self {
        Self {
            dir: dir.into(),
            kind,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Cached digest for `key`, if present and not older than the package
    pub fn lookup(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        let path = self.entry_path(key);
        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError { path, source }),
        };

        let entry_mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if key.mtime > entry_mtime {
            debug!(
                "Cache entry {} is older than the package, recomputing",
                path.display()
            );
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|source| CacheError {
            path: path.clone(),
            source,
        })?;
        let digest = content.lines().next().unwrap_or("").trim();
        if !self.kind.is_digest(digest) {
            debug!("Cache entry {} is not a {} digest", path.display(), self.kind);
            return Ok(None);
        }
        Ok(Some(digest.to_string()))
    }

    /// Write (or overwrite) the entry for `key`
    pub fn store(&self, key: &CacheKey, digest: &str) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        let write = || -> io::Result<()> {
            let mut temp = NamedTempFile::new_in(&self.dir)?;
            temp.write_all(digest.as_bytes())?;
            temp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        };
        write().map_err(|source| CacheError {
            path: path.clone(),
            source,
        })
    }
}
