// src/repository/modify.rs

//! Adding and removing extra metadata files on a published repository
//!
//! Works in place on a `repodata` directory: the file is written next to
//! `repomd.xml` under a content-addressed name and the catalog is updated.

use crate::checksum::{Checksum, ChecksumType};
use crate::compress::{self, Compression};
use crate::config::{CATALOG_FILE, FINAL_DIR};
use crate::error::{Error, Result};
use crate::repository::catalog::{Catalog, CatalogEntry};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{info, warn};

/// How a file is added
#[derive(Debug, Clone, Default)]
pub struct ModifyOptions {
    /// Catalog data type; derived from the file name when absent
    pub data_type: Option<String>,
    /// Compress even if the file already is compressed
    pub force_compress: bool,
    pub compression: Compression,
    pub checksum: ChecksumType,
}

/// Data type implied by a file name: everything before the first `.`
pub fn data_type_for(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// Open `repodata/repomd.xml`
fn load_catalog(repodata: &Path) -> Result<(PathBuf, Catalog)> {
    let path = repodata.join(CATALOG_FILE);
    if !path.exists() {
        return Err(Error::NotFound(format!("{} not found", path.display())));
    }
    let catalog = Catalog::load(&path)?;
    Ok((path, catalog))
}

/// Add `file` to the repository, replacing any entry of the same type
pub fn add(repodata: &Path, file: &Path, options: &ModifyOptions) -> Result<CatalogEntry> {
    let (catalog_path, mut catalog) = load_catalog(repodata)?;
    if !file.is_file() {
        return Err(Error::NotFound(format!("{} not found", file.display())));
    }

    let mut name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Config(format!("Invalid metadata file {}", file.display())))?;
    let already_compressed = Compression::from_path(file).is_some();
    let compress = options.force_compress || !already_compressed;
    if compress {
        name = format!("{}.{}", name, options.compression.extension());
    }
    let data_type = options
        .data_type
        .clone()
        .unwrap_or_else(|| data_type_for(&name).to_string());

    let staged = repodata.join(&name);
    if compress {
        options
            .compression
            .compress_file(file, &staged)
            .map_err(|e| Error::document(&staged, e))?;
    } else if fs::canonicalize(file).ok() != fs::canonicalize(&staged).ok() {
        fs::copy(file, &staged).map_err(|e| Error::document(&staged, e))?;
    }

    // Open values describe the uncompressed content
    let mut content: Box<dyn Read> = if compress {
        Box::new(BufReader::new(File::open(file).map_err(|e| Error::document(file, e))?))
    } else {
        compress::open_maybe_compressed(file).map_err(|e| Error::document(file, e))?
    };
    let (open_checksum, open_size) = options
        .checksum
        .digest_counted(&mut content)
        .map_err(|e| Error::document(file, e))?;

    let mut reader = BufReader::new(File::open(&staged).map_err(|e| Error::document(&staged, e))?);
    let checksum = options
        .checksum
        .digest_reader(&mut reader)
        .map_err(|e| Error::document(&staged, e))?;
    let final_name = format!("{}-{}", checksum, name);
    let final_path = repodata.join(&final_name);
    fs::rename(&staged, &final_path).map_err(|e| Error::document(&staged, e))?;

    let metadata = fs::metadata(&final_path).map_err(|e| Error::document(&final_path, e))?;
    let entry = CatalogEntry {
        data_type: data_type.clone(),
        href: format!("{}/{}", FINAL_DIR, final_name),
        base: None,
        checksum: Checksum::new(options.checksum, checksum),
        open_checksum: Some(Checksum::new(options.checksum, open_checksum)),
        timestamp: metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0),
        size: Some(metadata.len()),
        open_size: Some(open_size),
        database_version: None,
    };

    let old = catalog.replace(entry.clone());
    catalog.save(&catalog_path)?;
    info!("Added {} as {}", data_type, entry.href);

    if let Some(old) = old {
        if old.href != entry.href {
            remove_file(repodata, &old)?;
        }
    }
    Ok(entry)
}

/// Remove the entry named by `name` (a data type or a file name)
///
/// Returns `None` when the catalog has no such entry.
pub fn remove(repodata: &Path, name: &str, data_type: Option<&str>) -> Result<Option<CatalogEntry>> {
    let (catalog_path, mut catalog) = load_catalog(repodata)?;
    let data_type = data_type.unwrap_or_else(|| data_type_for(name));

    let Some(old) = catalog.remove(data_type) else {
        warn!("Metadata not found: {}", data_type);
        return Ok(None);
    };
    remove_file(repodata, &old)?;
    catalog.save(&catalog_path)?;
    info!("Removed {} ({})", data_type, old.href);
    Ok(Some(old))
}

fn remove_file(repodata: &Path, entry: &CatalogEntry) -> Result<()> {
    let path = repodata.join(entry.file_name());
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::document(&path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoTags;
    use tempfile::TempDir;

    fn repodata() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("repodata");
        fs::create_dir(&dir).unwrap();
        Catalog::new("7", RepoTags::default())
            .save(&dir.join(CATALOG_FILE))
            .unwrap();
        (temp, dir)
    }

    #[test]
    fn test_data_type_from_name() {
        assert_eq!(data_type_for("updateinfo.xml.gz"), "updateinfo");
        assert_eq!(data_type_for("prestodelta"), "prestodelta");
    }

    #[test]
    fn test_add_compresses_and_catalogs() {
        let (temp, dir) = repodata();
        let source = temp.path().join("updateinfo.xml");
        fs::write(&source, "<updates/>\n").unwrap();

        let entry = add(&dir, &source, &ModifyOptions::default()).unwrap();

        assert_eq!(entry.data_type, "updateinfo");
        assert!(entry.href.starts_with("repodata/"));
        assert!(entry.href.ends_with("-updateinfo.xml.gz"));
        let stored = dir.join(entry.file_name());
        assert_eq!(compress::read_to_string(&stored).unwrap(), "<updates/>\n");
        assert_eq!(
            entry.open_checksum.as_ref().unwrap().value,
            ChecksumType::Sha256.digest_bytes(b"<updates/>\n")
        );

        let catalog = Catalog::load(&dir.join(CATALOG_FILE)).unwrap();
        assert_eq!(catalog.revision, "7");
        assert_eq!(catalog.entry("updateinfo"), Some(&entry));
    }

    #[test]
    fn test_replacing_removes_old_file() {
        let (temp, dir) = repodata();
        let source = temp.path().join("updateinfo.xml");
        fs::write(&source, "<updates/>\n").unwrap();
        let first = add(&dir, &source, &ModifyOptions::default()).unwrap();

        fs::write(&source, "<updates><update/></updates>\n").unwrap();
        let second = add(&dir, &source, &ModifyOptions::default()).unwrap();

        assert_ne!(first.href, second.href);
        assert!(!dir.join(first.file_name()).exists());
        assert!(dir.join(second.file_name()).exists());
        assert_eq!(Catalog::load(&dir.join(CATALOG_FILE)).unwrap().entries.len(), 1);
    }

    #[test]
    fn test_compressed_input_is_kept_as_is() {
        let (temp, dir) = repodata();
        let source = temp.path().join("modules.yaml.xz");
        Compression::Xz
            .compress_file(&write(&temp, "modules.yaml", "---\n"), &source)
            .unwrap();

        let entry = add(&dir, &source, &ModifyOptions::default()).unwrap();
        assert_eq!(entry.data_type, "modules");
        assert!(entry.href.ends_with("-modules.yaml.xz"));
        assert_eq!(
            entry.open_checksum.as_ref().unwrap().value,
            ChecksumType::Sha256.digest_bytes(b"---\n")
        );
        assert_eq!(entry.open_size, Some(4));
        assert_eq!(entry.size, Some(fs::metadata(&source).unwrap().len()));
        assert_eq!(
            fs::read(dir.join(entry.file_name())).unwrap(),
            fs::read(&source).unwrap()
        );
    }

    fn write(temp: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = temp.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_remove() {
        let (temp, dir) = repodata();
        let source = write(&temp, "updateinfo.xml", "<updates/>\n");
        let entry = add(&dir, &source, &ModifyOptions::default()).unwrap();

        let removed = remove(&dir, "updateinfo.xml", None).unwrap();
        assert_eq!(removed, Some(entry.clone()));
        assert!(!dir.join(entry.file_name()).exists());
        assert!(Catalog::load(&dir.join(CATALOG_FILE)).unwrap().entries.is_empty());

        assert_eq!(remove(&dir, "updateinfo", None).unwrap(), None);
    }

    #[test]
    fn test_missing_catalog() {
        let temp = TempDir::new().unwrap();
        let source = write(&temp, "x.xml", "x");
        assert!(matches!(
            add(temp.path(), &source, &ModifyOptions::default()),
            Err(Error::NotFound(_))
        ));
    }
}
