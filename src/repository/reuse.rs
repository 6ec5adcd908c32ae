// src/repository/reuse.rs

//! Reuse index for incremental runs
//!
//! Built from the previously published documents. Primary fragments are
//! keyed by relative path; filelists and other fragments are keyed by
//! pkgid, since several paths may hold identical content and share them.
//! Fragments are owned by the index until every path that refers to them
//! has been released.

use crate::config::{RunConfig, CATALOG_FILE};
use crate::error::Result;
use crate::metadata::reader::{fragment_pkgid, package_fragments, parse_primary, relocate};
use crate::metadata::{read_document, DocumentKind, Fragments};
use crate::packages::PackageRecord;
use crate::repository::catalog::Catalog;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a previously indexed package cannot be reused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StaleEntry {
    #[error("package file is gone")]
    Missing,

    #[error("not a regular file")]
    NotRegularFile,

    #[error("size changed from {recorded} to {actual}")]
    Size { recorded: u64, actual: u64 },

    #[error("mtime changed from {recorded} to {actual}")]
    Mtime { recorded: u64, actual: u64 },
}

/// Check that the package file behind `record` is unchanged on disk
pub fn check_entry(package_dir: &Path, record: &PackageRecord) -> std::result::Result<(), StaleEntry> {
    let path = package_dir.join(&record.location.href);
    let metadata = fs::metadata(&path).map_err(|_| StaleEntry::Missing)?;
    if !metadata.is_file() {
        return Err(StaleEntry::NotRegularFile);
    }
    if metadata.len() != record.package_size {
        return Err(StaleEntry::Size {
            recorded: record.package_size,
            actual: metadata.len(),
        });
    }
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    if mtime != record.file_time {
        return Err(StaleEntry::Mtime {
            recorded: record.file_time,
            actual: mtime,
        });
    }
    Ok(())
}

#[derive(Debug)]
struct PrimaryEntry {
    pkgid: String,
    fragment: String,
}

/// Previously written fragments, served by relative path
#[derive(Debug, Default)]
pub struct ReuseIndex {
    primary: HashMap<String, PrimaryEntry>,
    filelists: HashMap<String, String>,
    other: HashMap<String, String>,
    /// pkgid -> relative paths still referring to it
    refs: HashMap<String, Vec<String>>,
    base_url: Option<String>,
}

impl ReuseIndex {
    /// Index the metadata currently published under the output directory
    ///
    /// A missing catalog yields an empty index.
    pub fn load(config: &RunConfig) -> Result<Self> {
        let catalog_path = config.final_dir().join(CATALOG_FILE);
        if !catalog_path.exists() {
            info!("No previous metadata found, extracting every package");
            return Ok(Self::default());
        }

        let catalog = Catalog::load(&catalog_path)?;
        let mut documents = Vec::new();
        for kind in DocumentKind::ALL {
            let Some(entry) = catalog.entry(kind.data_type()) else {
                warn!(
                    "Previous catalog lists no {} document, reuse disabled",
                    kind.data_type()
                );
                return Ok(Self::default());
            };
            documents.push(read_document(&config.output_dir.join(&entry.href))?);
        }

        let stat_dir = (!config.skip_stat).then_some(config.package_dir.as_path());
        let index = Self::from_documents(
            &documents[0],
            &documents[1],
            &documents[2],
            stat_dir,
            config.extract.base_url.clone(),
        )?;
        info!("Loaded {} reusable packages", index.len());
        Ok(index)
    }

    /// Build the index from the text of the three documents
    ///
    /// When `stat_dir` is given, entries whose package file changed are
    /// left out.
    pub fn from_documents(
        primary: &str,
        filelists: &str,
        other: &str,
        stat_dir: Option<&Path>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let mut index = Self {
            base_url,
            ..Self::default()
        };

        for fragment in package_fragments(primary)? {
            let record = match parse_primary(fragment) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping unreadable package in previous primary: {}", e);
                    continue;
                }
            };
            let relative = record.location.href.clone();
            if let Some(dir) = stat_dir {
                if let Err(reason) = check_entry(dir, &record) {
                    debug!("Not reusing {}: {}", relative, reason);
                    continue;
                }
            }
            let pkgid = record.pkgid().to_string();
            index.refs.entry(pkgid.clone()).or_default().push(relative.clone());
            index.primary.insert(
                relative,
                PrimaryEntry {
                    pkgid,
                    fragment: fragment.to_string(),
                },
            );
        }

        index.filelists = index.keyed_fragments(filelists)?;
        index.other = index.keyed_fragments(other)?;
        Ok(index)
    }

    /// Fragments of a pkgid-keyed document that some indexed path refers to
    fn keyed_fragments(&self, document: &str) -> Result<HashMap<String, String>> {
        let mut map = HashMap::new();
        for fragment in package_fragments(document)? {
            if let Some(pkgid) = fragment_pkgid(fragment)? {
                if self.refs.contains_key(&pkgid) && !map.contains_key(&pkgid) {
                    map.insert(pkgid, fragment.to_string());
                }
            }
        }
        Ok(map)
    }

    /// Whether `lookup` would serve `relative`
    pub fn contains(&self, relative: &str) -> bool {
        self.primary.get(relative).is_some_and(|entry| {
            self.refs.get(&entry.pkgid).is_some_and(|paths| !paths.is_empty())
                && self.filelists.contains_key(&entry.pkgid)
                && self.other.contains_key(&entry.pkgid)
        })
    }

    /// Fragments for `relative`, or `None` if it cannot be reused
    pub fn lookup(&self, relative: &str) -> Option<Fragments> {
        if !self.contains(relative) {
            return None;
        }
        let entry = self.primary.get(relative)?;
        let filelists = self.filelists.get(&entry.pkgid)?;
        let other = self.other.get(&entry.pkgid)?;

        let primary = match &self.base_url {
            Some(base) => match relocate(&entry.fragment, base) {
                Ok(fragment) => fragment,
                Err(e) => {
                    warn!("Not reusing {}: {}", relative, e);
                    return None;
                }
            },
            None => entry.fragment.clone(),
        };

        Some(Fragments {
            primary,
            filelists: filelists.clone(),
            other: other.clone(),
        })
    }

    /// Drop `relative` from the index
    ///
    /// Shared fragments are freed once the last path using them is gone.
    pub fn release(&mut self, relative: &str) {
        let Some(entry) = self.primary.remove(relative) else {
            return;
        };
        if let Some(paths) = self.refs.get_mut(&entry.pkgid) {
            paths.retain(|p| p != relative);
            if paths.is_empty() {
                self.refs.remove(&entry.pkgid);
                self.filelists.remove(&entry.pkgid);
                self.other.remove(&entry.pkgid);
            }
        }
    }

    /// Number of paths still indexed
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Number of filelists/other fragment pairs still held
    pub fn shared_len(&self) -> usize {
        self.filelists.len()
    }
}
