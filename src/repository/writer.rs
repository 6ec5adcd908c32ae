// src/repository/writer.rs

//! The document writer and catalog builder
//!
//! A run moves strictly forward through its states, each represented by
//! its own type so that a finished stage cannot be revisited:
//!
//! - `MetadataWriter`: the three documents are open in the scratch
//!   directory and packages are being appended
//! - `ClosedDocuments`: the documents are complete on disk
//! - `CatalogedRun`: digests are known and `repomd.xml` is written
//! - `RunSummary`: the scratch directory has been published

use crate::checksum::Checksum;
use crate::compress::{self, CompressedWriter, Compression};
use crate::config::{PrimaryFilter, RunConfig, CATALOG_FILE, FINAL_DIR};
use crate::db::{self, DB_VERSION};
use crate::error::{Error, Result};
use crate::metadata::{read_document, DocumentKind, Fragments};
use crate::packages::{self, PackageSource};
use crate::repository::catalog::{Catalog, CatalogEntry};
use crate::repository::publish;
use crate::repository::reuse::ReuseIndex;
use crate::worker::{WorkerOutput, WorkerPool};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, error, info};

/// Per-run package counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Packages announced in the document preambles
    pub packages: usize,
    /// Served from the previous metadata
    pub reused: usize,
    /// Freshly extracted, in-process or by workers
    pub extracted: usize,
    /// Failed to extract and left out
    pub skipped: usize,
}

struct DocumentStream {
    kind: DocumentKind,
    path: PathBuf,
    out: CompressedWriter<BufWriter<File>>,
}

/// Documents open for writing
pub struct MetadataWriter<'a> {
    config: &'a RunConfig,
    filter: PrimaryFilter,
    reuse: ReuseIndex,
    streams: Vec<DocumentStream>,
    stats: RunStats,
}

impl<'a> MetadataWriter<'a> {
    /// Create the three documents in the scratch directory and write their
    /// preambles
    pub fn open(config: &'a RunConfig, count: usize, reuse: ReuseIndex) -> Result<Self> {
        let filter = config.extract.primary_filter()?;
        let scratch = config.scratch_dir();

        let mut streams = Vec::with_capacity(DocumentKind::ALL.len());
        for kind in DocumentKind::ALL {
            let name = kind.xml_name();
            let path = scratch.join(format!("{}.{}", name, config.compression.extension()));
            let file = File::create(&path).map_err(|e| Error::document(&path, e))?;
            let mut out = config
                .compression
                .wrap_writer(BufWriter::new(file), &name)
                .map_err(|e| Error::document(&path, e))?;
            out.write_all(kind.preamble(count).as_bytes())
                .map_err(|e| Error::document(&path, e))?;
            debug!("Opened {}", path.display());
            streams.push(DocumentStream { kind, path, out });
        }

        Ok(Self {
            config,
            filter,
            reuse,
            streams,
            stats: RunStats {
                packages: count,
                ..RunStats::default()
            },
        })
    }

    fn emit(&mut self, fragments: &Fragments) -> Result<()> {
        for stream in &mut self.streams {
            stream
                .out
                .write_all(fragments.get(stream.kind).as_bytes())
                .and_then(|_| stream.out.write_all(b"\n"))
                .map_err(|e| Error::document(&stream.path, e))?;
        }
        Ok(())
    }

    /// Append one package, reusing its old fragments when possible
    ///
    /// Packages that cannot be extracted are reported and skipped.
    pub fn add(&mut self, source: PackageSource) -> Result<()> {
        let relative = match source {
            PackageSource::Preloaded(record) => {
                let fragments = Fragments::render(&record, &self.filter);
                self.emit(&fragments)?;
                self.stats.extracted += 1;
                return Ok(());
            }
            PackageSource::Path(relative) => relative,
        };

        if let Some(fragments) = self.reuse.lookup(&relative) {
            self.reuse.release(&relative);
            self.emit(&fragments)?;
            self.stats.reused += 1;
            debug!("Reused {}", relative);
            return Ok(());
        }

        let path = self.config.package_path(&relative);
        match packages::extract(&path, &relative, &self.config.extract) {
            Ok(record) => {
                let fragments = Fragments::render(&record, &self.filter);
                self.emit(&fragments)?;
                self.stats.extracted += 1;
                debug!("Extracted {}", record.nevra());
            }
            Err(e) => {
                error!("{}", e);
                self.stats.skipped += 1;
            }
        }
        Ok(())
    }

    /// Append every package of the run
    ///
    /// With more than one worker, reused and preloaded packages are written
    /// first in input order, followed by the workers' output in chunk order.
    pub fn populate(&mut self, sources: Vec<PackageSource>) -> Result<()> {
        if self.config.workers <= 1 {
            for source in sources {
                self.add(source)?;
            }
            return Ok(());
        }

        let mut pending = Vec::new();
        for source in sources {
            match source {
                PackageSource::Path(relative) if !self.reuse.contains(&relative) => {
                    pending.push(relative)
                }
                other => self.add(other)?,
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        let output = WorkerPool::new(self.config)?.run(&pending)?;
        for worker in &output.workers {
            self.append_worker_output(worker)?;
        }
        Ok(())
    }

    /// Copy a finished worker's fragment files into the documents
    pub fn append_worker_output(&mut self, output: &WorkerOutput) -> Result<()> {
        for stream in &mut self.streams {
            let source = output.fragment_path(stream.kind);
            let mut file = File::open(&source).map_err(|e| {
                Error::WorkerProcess(format!("Cannot open {}: {}", source.display(), e))
            })?;
            io::copy(&mut file, &mut stream.out).map_err(|e| Error::document(&stream.path, e))?;
        }
        self.stats.extracted += output.report.written;
        self.stats.skipped += output.report.failed.len();
        debug!(
            "Appended worker {}: {} packages",
            output.index, output.report.written
        );
        Ok(())
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Write the closing tags and flush the documents to disk
    pub fn close(self) -> Result<ClosedDocuments<'a>> {
        let mut documents = Vec::with_capacity(self.streams.len());
        for mut stream in self.streams {
            let path = stream.path;
            stream
                .out
                .write_all(stream.kind.closer().as_bytes())
                .map_err(|e| Error::document(&path, e))?;
            let buffered = stream.out.finish().map_err(|e| Error::document(&path, e))?;
            let file = buffered
                .into_inner()
                .map_err(|e| Error::document(&path, e.into_error()))?;
            file.sync_all().map_err(|e| Error::document(&path, e))?;
            documents.push((stream.kind, path));
        }

        info!(
            "Wrote {} packages ({} reused, {} extracted, {} skipped)",
            self.stats.reused + self.stats.extracted,
            self.stats.reused,
            self.stats.extracted,
            self.stats.skipped
        );
        Ok(ClosedDocuments {
            config: self.config,
            documents,
            stats: self.stats,
        })
    }
}

/// Complete documents waiting to be cataloged
pub struct ClosedDocuments<'a> {
    config: &'a RunConfig,
    documents: Vec<(DocumentKind, PathBuf)>,
    stats: RunStats,
}

impl<'a> ClosedDocuments<'a> {
    /// Digest every artifact and write `repomd.xml` into the scratch
    /// directory
    pub fn catalog(self) -> Result<CatalogedRun<'a>> {
        let config = self.config;
        let revision = config
            .revision
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().timestamp().to_string());
        let mut catalog = Catalog::new(revision, config.tags.clone());

        let mut finished = Vec::with_capacity(self.documents.len());
        for (kind, path) in &self.documents {
            let (entry, path) = artifact_entry(config, kind.data_type(), path, true)?;
            finished.push((*kind, path, entry.open_checksum.clone()));
            catalog.replace(entry);
        }

        if config.database {
            for (kind, path, open_checksum) in &finished {
                let entry = database_entry(config, *kind, path, open_checksum.as_ref())?;
                catalog.replace(entry);
            }
        }

        if let Some(groupfile) = &config.groupfile {
            for entry in group_entries(config, groupfile)? {
                catalog.replace(entry);
            }
        }

        let catalog_path = config.scratch_dir().join(CATALOG_FILE);
        catalog.save(&catalog_path)?;

        Ok(CatalogedRun {
            config,
            catalog,
            stats: self.stats,
        })
    }
}

/// A fully written scratch directory
pub struct CatalogedRun<'a> {
    config: &'a RunConfig,
    catalog: Catalog,
    stats: RunStats,
}

impl<'a> CatalogedRun<'a> {
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Swap the scratch directory into place
    pub fn publish(self) -> Result<RunSummary> {
        publish::publish(self.config)?;
        Ok(RunSummary {
            catalog: self.catalog,
            stats: self.stats,
        })
    }
}

/// What a published run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub catalog: Catalog,
    pub stats: RunStats,
}

fn mtime_secs(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Build the catalog entry for a finished file, renaming it to its
/// content-addressed name when configured
///
/// Returns the entry and the file's final path.
fn artifact_entry(
    config: &RunConfig,
    data_type: &str,
    path: &Path,
    compressed: bool,
) -> Result<(CatalogEntry, PathBuf)> {
    let kind = config.extract.checksum;
    let metadata = fs::metadata(path).map_err(|e| Error::document(path, e))?;
    let checksum = kind.digest_file(path).map_err(|e| Error::document(path, e))?;

    let (open_checksum, open_size) = if compressed {
        let mut reader = compress::open_maybe_compressed(path).map_err(|e| Error::document(path, e))?;
        let (digest, size) = kind
            .digest_counted(&mut reader)
            .map_err(|e| Error::document(path, e))?;
        (Some(Checksum::new(kind, digest)), Some(size))
    } else {
        (None, None)
    };

    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut final_path = path.to_path_buf();
    if config.unique_md_filenames {
        name = format!("{}-{}", checksum, name);
        final_path = path.with_file_name(&name);
        fs::rename(path, &final_path).map_err(|e| Error::document(path, e))?;
    }

    let entry = CatalogEntry {
        data_type: data_type.to_string(),
        href: format!("{}/{}", FINAL_DIR, name),
        base: None,
        checksum: Checksum::new(kind, checksum),
        open_checksum,
        timestamp: mtime_secs(&metadata),
        size: Some(metadata.len()),
        open_size,
        database_version: None,
    };
    debug!("Cataloged {} as {}", data_type, entry.href);
    Ok((entry, final_path))
}

/// Build, compress and catalog the sqlite form of one document
fn database_entry(
    config: &RunConfig,
    kind: DocumentKind,
    document: &Path,
    open_checksum: Option<&Checksum>,
) -> Result<CatalogEntry> {
    let scratch = config.scratch_dir();
    let db_path = scratch.join(format!("{}.sqlite", kind.data_type()));
    let text = read_document(document)?;
    let source_digest = open_checksum.map(|c| c.value.as_str()).unwrap_or_default();
    db::build_database(kind, &text, source_digest, &db_path)?;

    let compressed = scratch.join(format!(
        "{}.sqlite.{}",
        kind.data_type(),
        Compression::Bzip2.extension()
    ));
    Compression::Bzip2
        .compress_file(&db_path, &compressed)
        .map_err(|e| Error::document(&compressed, e))?;
    fs::remove_file(&db_path).map_err(|e| Error::document(&db_path, e))?;

    let (mut entry, _) =
        artifact_entry(config, &format!("{}_db", kind.data_type()), &compressed, true)?;
    entry.database_version = Some(DB_VERSION);
    Ok(entry)
}

/// Copy the group file into the scratch directory, plain and gzipped
fn group_entries(config: &RunConfig, groupfile: &Path) -> Result<Vec<CatalogEntry>> {
    let name = groupfile
        .file_name()
        .ok_or_else(|| Error::Config(format!("Invalid group file {}", groupfile.display())))?;
    let plain = config.scratch_dir().join(name);
    fs::copy(groupfile, &plain).map_err(|e| Error::document(&plain, e))?;

    let gz = PathBuf::from(format!(
        "{}.{}",
        plain.display(),
        Compression::Gzip.extension()
    ));
    Compression::Gzip
        .compress_file(&plain, &gz)
        .map_err(|e| Error::document(&gz, e))?;

    let (group, _) = artifact_entry(config, "group", &plain, false)?;
    let (group_gz, _) = artifact_entry(config, "group_gz", &gz, true)?;
    Ok(vec![group, group_gz])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::xml::tests::sample_record;
    use crate::packages::rpm::tests::build_test_rpm;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RunConfig) {
        let temp = TempDir::new().unwrap();
        let config = RunConfig::new(temp.path());
        fs::create_dir_all(config.scratch_dir()).unwrap();
        (temp, config)
    }

    fn document(config: &RunConfig, kind: DocumentKind) -> String {
        read_document(
            &config
                .scratch_dir()
                .join(format!("{}.gz", kind.xml_name())),
        )
        .unwrap()
    }

    #[test]
    fn test_documents_frame_fragments() {
        let (_temp, config) = setup();
        let mut writer = MetadataWriter::open(&config, 1, ReuseIndex::default()).unwrap();
        writer
            .add(PackageSource::Preloaded(Box::new(sample_record())))
            .unwrap();
        writer.close().unwrap();

        let filter = config.extract.primary_filter().unwrap();
        let fragments = Fragments::render(&sample_record(), &filter);
        for kind in DocumentKind::ALL {
            assert_eq!(
                document(&config, kind),
                format!(
                    "{}{}\n{}",
                    kind.preamble(1),
                    fragments.get(kind),
                    kind.closer()
                )
            );
        }
    }

    #[test]
    fn test_broken_package_is_skipped() {
        let (temp, config) = setup();
        build_test_rpm(temp.path(), "good", "1.0");
        fs::write(temp.path().join("bad.rpm"), b"garbage").unwrap();

        let mut writer = MetadataWriter::open(&config, 2, ReuseIndex::default()).unwrap();
        writer
            .populate(vec![
                PackageSource::Path("bad.rpm".to_string()),
                PackageSource::Path("good-1.0-1.x86_64.rpm".to_string()),
            ])
            .unwrap();
        assert_eq!(writer.stats().skipped, 1);
        assert_eq!(writer.stats().extracted, 1);
        writer.close().unwrap();

        let primary = document(&config, DocumentKind::Primary);
        assert!(primary.contains("packages=\"2\""));
        assert_eq!(primary.matches("<package type=\"rpm\">").count(), 1);
    }

    #[test]
    fn test_catalog_digests_match_files() {
        let (_temp, config) = setup();
        let mut writer = MetadataWriter::open(&config, 1, ReuseIndex::default()).unwrap();
        writer
            .add(PackageSource::Preloaded(Box::new(sample_record())))
            .unwrap();
        let cataloged = writer.close().unwrap().catalog().unwrap();

        let catalog = cataloged.catalog();
        assert_eq!(catalog.entries.len(), 3);
        for kind in DocumentKind::ALL {
            let entry = catalog.entry(kind.data_type()).unwrap();
            let path = config.output_dir.join(".repodata").join(entry.file_name());
            let digest = config.extract.checksum.digest_file(&path).unwrap();
            assert_eq!(entry.checksum.value, digest);
            assert_eq!(entry.size, Some(fs::metadata(&path).unwrap().len()));

            let text = document(&config, kind);
            assert_eq!(
                entry.open_checksum.as_ref().unwrap().value,
                config.extract.checksum.digest_bytes(text.as_bytes())
            );
            assert_eq!(entry.open_size, Some(text.len() as u64));
        }
        assert!(config.scratch_dir().join(CATALOG_FILE).exists());
    }

    #[test]
    fn test_unique_names_and_databases() {
        let (temp, mut config) = setup();
        config.unique_md_filenames = true;
        config.database = true;
        let comps = temp.path().join("comps.xml");
        fs::write(&comps, "<comps/>\n").unwrap();
        config.groupfile = Some(comps);

        let mut writer = MetadataWriter::open(&config, 1, ReuseIndex::default()).unwrap();
        writer
            .add(PackageSource::Preloaded(Box::new(sample_record())))
            .unwrap();
        let cataloged = writer.close().unwrap().catalog().unwrap();
        let catalog = cataloged.catalog();

        let types: Vec<&str> = catalog.entries.iter().map(|e| e.data_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "primary",
                "filelists",
                "other",
                "primary_db",
                "filelists_db",
                "other_db",
                "group",
                "group_gz"
            ]
        );

        for entry in &catalog.entries {
            assert!(
                entry.file_name().starts_with(&format!("{}-", entry.checksum.value)),
                "{} is not content addressed",
                entry.href
            );
            assert!(config.scratch_dir().join(entry.file_name()).exists());
        }

        let primary_db = catalog.entry("primary_db").unwrap();
        assert_eq!(primary_db.database_version, Some(DB_VERSION));
        assert!(primary_db.href.ends_with("-primary.sqlite.bz2"));
        assert!(catalog.entry("group").unwrap().open_checksum.is_none());
        assert!(!config.scratch_dir().join("primary.sqlite").exists());
    }
}
