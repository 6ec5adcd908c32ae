// src/metadata/mod.rs

//! The primary, filelists and other XML dialects

pub mod reader;
pub mod xml;

pub use xml::{DocumentKind, Fragments};

use crate::compress;
use crate::error::{Error, Result};
use std::path::Path;

/// Read a whole (possibly compressed) metadata document
pub fn read_document(path: &Path) -> Result<String> {
    compress::read_to_string(path).map_err(|e| Error::document(path, e))
}
