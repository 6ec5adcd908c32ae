// src/config.rs

//! Run configuration
//!
//! A `RunConfig` is built once (normally from the command line) and then
//! handed by reference to every component. Nothing reads ambient state.

use crate::checksum::ChecksumType;
use crate::compress::Compression;
use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default patterns for files listed in the primary document
pub const DEFAULT_FILE_PATTERNS: &[&str] = &[r".*bin/.*", r"^/etc/.*", r"^/usr/lib/sendmail$"];

/// Default patterns for directories listed in the primary document
pub const DEFAULT_DIR_PATTERNS: &[&str] = &[r".*bin/.*", r"^/etc/.*"];

/// Published metadata directory name
pub const FINAL_DIR: &str = "repodata";

/// Scratch directory the run writes into before publishing
pub const SCRATCH_DIR: &str = ".repodata";

/// Staging name for the previously published directory during the swap
pub const OLD_DIR: &str = ".olddata";

/// Catalog document name
pub const CATALOG_FILE: &str = "repomd.xml";

/// Options the package extractor needs
///
/// This is the part of the configuration that travels to worker processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Digest algorithm for the whole-package checksum
    pub checksum: ChecksumType,
    /// Checksum cache directory, `None` disables caching
    pub cache_dir: Option<PathBuf>,
    /// Keep only the newest N changelog entries
    pub changelog_limit: Option<usize>,
    /// Regexes selecting the files listed in the primary document
    pub file_patterns: Vec<String>,
    /// Regexes selecting the directories listed in the primary document
    pub dir_patterns: Vec<String>,
    /// `xml:base` written on every package location
    pub base_url: Option<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            checksum: ChecksumType::default(),
            cache_dir: None,
            changelog_limit: None,
            file_patterns: DEFAULT_FILE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            dir_patterns: DEFAULT_DIR_PATTERNS.iter().map(|s| s.to_string()).collect(),
            base_url: None,
        }
    }
}

impl ExtractOptions {
    /// Compile the pattern lists
    pub fn primary_filter(&self) -> Result<PrimaryFilter> {
        PrimaryFilter::new(&self.file_patterns, &self.dir_patterns)
    }
}

/// Compiled allow-lists narrowing the file manifest for the primary document
///
/// Patterns match from the start of the path, so `.*bin/.*` selects any
/// path with a `bin/` component while `^/etc/.*` selects only `/etc`.
#[derive(Debug, Clone)]
pub struct PrimaryFilter {
    files: Vec<Regex>,
    dirs: Vec<Regex>,
}

impl PrimaryFilter {
    pub fn new(file_patterns: &[String], dir_patterns: &[String]) -> Result<Self> {
        Ok(Self {
            files: compile_anchored(file_patterns)?,
            dirs: compile_anchored(dir_patterns)?,
        })
    }

    /// Whether a regular or ghost file belongs in the primary document
    pub fn keep_file(&self, path: &str) -> bool {
        self.files.iter().any(|re| re.is_match(path))
    }

    /// Whether a directory belongs in the primary document
    pub fn keep_dir(&self, path: &str) -> bool {
        self.dirs.iter().any(|re| re.is_match(path))
    }
}

fn compile_anchored(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(&format!("^(?:{})", p))
                .map_err(|e| Error::Config(format!("Invalid file pattern '{}': {}", p, e)))
        })
        .collect()
}

/// Free-text catalog tags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoTags {
    pub content: Vec<String>,
    pub repo: Vec<String>,
    /// `(cpeid, name)` pairs
    pub distro: Vec<(Option<String>, String)>,
}

impl RepoTags {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.repo.is_empty() && self.distro.is_empty()
    }
}

/// Complete configuration for one metadata generation run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory containing the packages
    pub package_dir: PathBuf,
    /// Directory receiving `repodata/` (defaults to the package directory)
    pub output_dir: PathBuf,
    /// Extraction options shared with worker processes
    pub extract: ExtractOptions,
    /// Glob patterns excluding packages, matched on relative paths
    pub excludes: Vec<String>,
    /// Explicit package list (relative paths) replacing directory enumeration
    pub pkglist: Option<Vec<String>>,
    /// Ignore symlinked packages while enumerating
    pub skip_symlinks: bool,
    /// Reuse fragments from the previously published metadata
    pub update: bool,
    /// Skip the size/mtime verification of reused entries
    pub skip_stat: bool,
    /// Also produce sqlite forms of the documents
    pub database: bool,
    /// Prefix metadata file names with their checksum
    pub unique_md_filenames: bool,
    /// Envelope for the three XML documents
    pub compression: Compression,
    /// Number of extraction worker processes (0 or 1 extracts in-process)
    pub workers: usize,
    /// Executable launched for worker processes
    pub worker_program: Option<PathBuf>,
    /// Catalog revision, defaults to the current unix time
    pub revision: Option<String>,
    /// Catalog tags
    pub tags: RepoTags,
    /// Comps/group file to copy into the metadata
    pub groupfile: Option<PathBuf>,
    /// Skip the run when no package is newer than the existing metadata
    pub checkts: bool,
}

impl RunConfig {
    /// Configuration with defaults for the given package directory
    pub fn new(package_dir: impl Into<PathBuf>) -> Self {
        let package_dir = package_dir.into();
        Self {
            output_dir: package_dir.clone(),
            package_dir,
            extract: ExtractOptions::default(),
            excludes: Vec::new(),
            pkglist: None,
            skip_symlinks: false,
            update: false,
            skip_stat: false,
            database: false,
            unique_md_filenames: false,
            compression: Compression::default(),
            workers: 0,
            worker_program: None,
            revision: None,
            tags: RepoTags::default(),
            groupfile: None,
            checkts: false,
        }
    }

    /// Check that the directories and files the run depends on are usable
    pub fn validate(&self) -> Result<()> {
        if !self.package_dir.is_dir() {
            return Err(Error::NotFound(format!(
                "Package directory {} must exist and be a directory",
                self.package_dir.display()
            )));
        }
        if !self.output_dir.is_dir() {
            return Err(Error::NotFound(format!(
                "Output directory {} must exist",
                self.output_dir.display()
            )));
        }
        if let Some(group) = &self.groupfile {
            if !group.is_file() {
                return Err(Error::NotFound(format!(
                    "Group file {} cannot be found",
                    group.display()
                )));
            }
        }
        if let Some(cache) = &self.extract.cache_dir {
            std::fs::create_dir_all(cache).map_err(|e| {
                Error::Config(format!("Cannot open/write to cache dir {}: {}", cache.display(), e))
            })?;
        }
        self.extract.primary_filter()?;
        Ok(())
    }

    pub fn final_dir(&self) -> PathBuf {
        self.output_dir.join(FINAL_DIR)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.output_dir.join(SCRATCH_DIR)
    }

    pub fn old_dir(&self) -> PathBuf {
        self.output_dir.join(OLD_DIR)
    }

    /// Absolute path of a package given its relative path
    pub fn package_path(&self, relative: &str) -> PathBuf {
        self.package_dir.join(relative)
    }

    /// Executable for worker processes, defaulting to the running binary
    pub fn worker_program(&self) -> Result<PathBuf> {
        match &self.worker_program {
            Some(program) => Ok(program.clone()),
            None => Ok(std::env::current_exe()?),
        }
    }
}

/// Relative path of `path` under `base`, using `/` separators
pub fn relative_path(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
