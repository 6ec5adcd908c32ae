// src/packages/rpm.rs

//! RPM package extractor
//!
//! Reads the embedded metadata of one package archive and turns it into a
//! `PackageRecord`. The whole-package digest and the header byte range are
//! each computed at most once per package.

use crate::cache::{CacheKey, ChecksumCache};
use crate::checksum::{Checksum, ChecksumType};
use crate::config::ExtractOptions;
use crate::error::PackageError;
use crate::packages::header::{read_header_range, HeaderRange, LEAD_SIZE};
use crate::packages::record::{
    dedup_relations, recent_changelog, ChangelogEntry, FileKind, FileManifest, Location,
    PackageRecord, Relation,
};
use std::cell::OnceCell;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// An opened RPM archive
pub struct RpmPackage {
    path: PathBuf,
    relative: String,
    metadata: rpm::PackageMetadata,
    size: u64,
    mtime: u64,
    checksum_type: ChecksumType,
    cache: Option<ChecksumCache>,
    base_url: Option<String>,
    changelog_limit: Option<usize>,
    header_range: OnceCell<HeaderRange>,
    checksum: OnceCell<String>,
}

impl RpmPackage {
    /// Open and parse the archive at `path`
    ///
    /// `relative` is the location written into the metadata.
    pub fn open(
        path: &Path,
        relative: &str,
        options: &ExtractOptions,
    ) -> Result<Self, PackageError> {
        debug!("Parsing RPM package: {}", path.display());

        let stat = std::fs::metadata(path)
            .map_err(|e| PackageError::open(path, format!("cannot stat: {}", e)))?;
        if !stat.is_file() {
            return Err(PackageError::open(path, "not a regular file"));
        }
        let mtime = stat
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let file = File::open(path).map_err(|e| PackageError::open(path, e.to_string()))?;
        let mut reader = BufReader::new(file);
        let metadata = rpm::PackageMetadata::parse(&mut reader)
            .map_err(|e| PackageError::open(path, format!("failed to parse RPM: {}", e)))?;

        for (field, value) in [
            ("name", metadata.get_name().map(|_| ())),
            ("version", metadata.get_version().map(|_| ())),
            ("release", metadata.get_release().map(|_| ())),
        ] {
            value.map_err(|e| PackageError::open(path, format!("missing {}: {}", field, e)))?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            relative: relative.to_string(),
            metadata,
            size: stat.len(),
            mtime,
            checksum_type: options.checksum,
            cache: options
                .cache_dir
                .as_ref()
                .map(|dir| ChecksumCache::new(dir, options.checksum)),
            base_url: options.base_url.clone(),
            changelog_limit: options.changelog_limit,
            header_range: OnceCell::new(),
            checksum: OnceCell::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn relative_path(&self) -> &str {
        &self.relative
    }

    /// Byte range of the main header, memoized after the first call
    pub fn header_range(&self) -> Result<HeaderRange, PackageError> {
        if let Some(range) = self.header_range.get() {
            return Ok(*range);
        }

        let mut reader = File::open(&self.path)
            .map(BufReader::new)
            .map_err(|e| PackageError::open(&self.path, e.to_string()))?;
        let range = read_header_range(&mut reader)
            .map_err(|e| PackageError::open(&self.path, format!("bad header layout: {}", e)))?;

        Ok(*self.header_range.get_or_init(|| range))
    }

    /// Whole-package digest, memoized after the first call
    pub fn checksum(&self) -> Result<String, PackageError> {
        if let Some(digest) = self.checksum.get() {
            return Ok(digest.clone());
        }

        let digest = match &self.cache {
            Some(cache) => self.cached_checksum(cache)?,
            None => self.compute_checksum()?,
        };

        Ok(self.checksum.get_or_init(|| digest).clone())
    }

    fn compute_checksum(&self) -> Result<String, PackageError> {
        self.checksum_type
            .digest_file(&self.path)
            .map_err(|e| PackageError::missing_identity(&self.path, e.to_string()))
    }

    fn cached_checksum(&self, cache: &ChecksumCache) -> Result<String, PackageError> {
        let key = self.cache_key()?;

        match cache.lookup(&key) {
            Ok(Some(digest)) => {
                debug!("Checksum cache hit for {}", self.relative);
                return Ok(digest);
            }
            Ok(None) => {}
            Err(e) => warn!("{}", e),
        }

        let digest = self.compute_checksum()?;
        if let Err(e) = cache.store(&key, &digest) {
            warn!("{}", e);
        }
        Ok(digest)
    }

    /// Cache key built from the file identity and its signature block
    pub fn cache_key(&self) -> Result<CacheKey, PackageError> {
        let range = self.header_range()?;
        let signature_key = self
            .signature_digest(range.start)
            .map_err(|e| PackageError::open(&self.path, format!("cannot read signature: {}", e)))?;

        let basename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(CacheKey {
            basename,
            signature_key,
            size: self.size,
            mtime: self.mtime,
        })
    }

    /// Digest over the signature header bytes, empty when there are none
    fn signature_digest(&self, header_start: u64) -> std::io::Result<String> {
        let len = header_start.saturating_sub(LEAD_SIZE);
        if len == 0 {
            return Ok(String::new());
        }
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(LEAD_SIZE))?;
        let mut blob = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut blob)?;
        Ok(ChecksumType::Sha256.digest_bytes(&blob))
    }

    fn arch(&self) -> String {
        if self.metadata.is_source_package() {
            "src".to_string()
        } else {
            self.metadata.get_arch().unwrap_or_default().to_string()
        }
    }

    fn relations(&self, deps: Result<Vec<rpm::Dependency>, rpm::Error>) -> Vec<Relation> {
        let relations = deps
            .unwrap_or_default()
            .iter()
            .map(|d| Relation::from_raw(&d.name, d.flags.bits(), &d.version))
            .collect();
        dedup_relations(relations)
    }

    fn files(&self) -> FileManifest {
        let mut manifest = FileManifest::default();
        match self.metadata.get_file_entries() {
            Ok(entries) => {
                for entry in entries {
                    let kind = FileKind::classify(entry.mode.raw_mode() as u32, entry.flags.bits());
                    manifest.push(kind, entry.path.to_string_lossy().into_owned());
                }
            }
            Err(e) => debug!("No file entries in {}: {}", self.relative, e),
        }
        manifest
    }

    fn changelog(&self) -> Vec<ChangelogEntry> {
        let entries = self
            .metadata
            .get_changelog_entries()
            .unwrap_or_default()
            .into_iter()
            .map(|c| ChangelogEntry {
                time: c.timestamp as u64,
                author: c.name,
                text: c.description,
            })
            .collect();
        recent_changelog(entries, self.changelog_limit)
    }

    fn archive_size(&self) -> u64 {
        self.metadata
            .header
            .get_entry_data_as_u32(rpm::IndexTag::RPMTAG_ARCHIVESIZE)
            .map(u64::from)
            .or_else(|_| {
                self.metadata
                    .signature
                    .get_entry_data_as_u32(rpm::IndexSignatureTag::RPMSIGTAG_PAYLOADSIZE)
                    .map(u64::from)
            })
            .unwrap_or(0)
    }

    /// Build the canonical record, computing digest and header range
    pub fn to_record(&self) -> Result<PackageRecord, PackageError> {
        let md = &self.metadata;
        let text = |value: Result<&str, rpm::Error>| value.unwrap_or_default().to_string();

        let record = PackageRecord {
            name: text(md.get_name()),
            arch: self.arch(),
            epoch: md.get_epoch().map(|e| e.to_string()).unwrap_or_else(|_| "0".to_string()),
            version: text(md.get_version()),
            release: text(md.get_release()),
            checksum: Checksum::new(self.checksum_type, self.checksum()?),
            summary: text(md.get_summary()),
            description: text(md.get_description()),
            packager: text(md.get_packager()),
            url: text(md.get_url()),
            license: text(md.get_license()),
            vendor: text(md.get_vendor()),
            group: text(md.get_group()),
            build_host: text(md.get_build_host()),
            source_rpm: md
                .get_source_rpm()
                .ok()
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            file_time: self.mtime,
            build_time: md.get_build_time().unwrap_or(0),
            package_size: self.size,
            installed_size: md.get_installed_size().unwrap_or(0),
            archive_size: self.archive_size(),
            header_range: self.header_range()?,
            location: Location {
                href: self.relative.clone(),
                base: self.base_url.clone(),
            },
            provides: self.relations(md.get_provides()),
            requires: self.relations(md.get_requires()),
            conflicts: self.relations(md.get_conflicts()),
            obsoletes: self.relations(md.get_obsoletes()),
            files: self.files(),
            changelog: self.changelog(),
        };

        debug!(
            "Parsed RPM: {} ({} files, {} requires)",
            record.nevra(),
            record.files.len(),
            record.requires.len()
        );

        Ok(record)
    }
}
