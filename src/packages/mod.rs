// src/packages/mod.rs

//! Package extraction for repogen
//!
//! Turns RPM archives into `PackageRecord`s. The byte-level header layout
//! lives in `header`, the canonical record model in `record`, and the
//! archive reader in `rpm`.

pub mod header;
pub mod record;
pub mod rpm;

pub use record::PackageRecord;

use crate::config::ExtractOptions;
use crate::error::PackageError;
use std::path::Path;

/// A package as handed to the document writer
#[derive(Debug, Clone)]
pub enum PackageSource {
    /// Relative path of an archive under the package directory
    Path(String),
    /// A record that has already been extracted
    Preloaded(Box<PackageRecord>),
}

/// Open the archive at `path` and build its record
pub fn extract(
    path: &Path,
    relative: &str,
    options: &ExtractOptions,
) -> Result<PackageRecord, PackageError> {
    rpm::RpmPackage::open(path, relative, options)?.to_record()
}
