// src/repository/scan.rs

//! Finding the packages of a run
//!
//! Either walks the package directory for `.rpm` files or reads an explicit
//! list, then drops everything matched by the exclusion globs.

use crate::config::{relative_path, RunConfig, CATALOG_FILE, FINAL_DIR, SCRATCH_DIR};
use crate::error::{Error, Result};
use crate::repository::catalog::Catalog;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const PACKAGE_EXTENSION: &str = ".rpm";

/// Relative paths of the packages to index, in a stable order
pub fn packages(config: &RunConfig) -> Result<Vec<String>> {
    let found = match &config.pkglist {
        Some(list) => list.clone(),
        None => walk(&config.package_dir, config.skip_symlinks)?,
    };

    let excludes = exclusion_set(&config.excludes)?;
    let total = found.len();
    let packages: Vec<String> = found
        .into_iter()
        .filter(|rel| !is_excluded(&excludes, rel))
        .collect();

    if packages.len() < total {
        info!("Excluded {} packages", total - packages.len());
    }
    debug!("Found {} packages", packages.len());
    Ok(packages)
}

/// Read a package list file: one relative path per line
///
/// Blank lines and `#` comments are ignored.
pub fn read_pkglist(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::NotFound(format!("Cannot read package list {}: {}", path.display(), e)))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn walk(dir: &Path, skip_symlinks: bool) -> Result<Vec<String>> {
    let mut found = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            // Never descend into our own metadata directories
            e.depth() == 0 || !(e.file_name() == FINAL_DIR || e.file_name() == SCRATCH_DIR)
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy();
        if !name.to_lowercase().ends_with(PACKAGE_EXTENSION) {
            continue;
        }
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            if skip_symlinks || !entry.path().is_file() {
                continue;
            }
        } else if !file_type.is_file() {
            continue;
        }
        found.push(relative_path(dir, entry.path()));
    }
    Ok(found)
}

fn exclusion_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Config(format!("Invalid exclude pattern '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("Invalid exclude patterns: {}", e)))
}

/// Matched against the relative path and against the bare file name
fn is_excluded(excludes: &GlobSet, relative: &str) -> bool {
    let name = relative.rsplit('/').next().unwrap_or(relative);
    excludes.is_match(relative) || excludes.is_match(name)
}

/// Whether the published metadata is newer than every package
///
/// False when there is no usable published catalog.
pub fn metadata_is_current(config: &RunConfig, packages: &[String]) -> Result<bool> {
    let catalog_path = config.final_dir().join(CATALOG_FILE);
    if !catalog_path.exists() {
        return Ok(false);
    }
    let catalog = Catalog::load(&catalog_path)?;
    let Some(published) = catalog.entries.iter().map(|e| e.timestamp).max() else {
        return Ok(false);
    };

    for relative in packages {
        let path = config.package_path(relative);
        let mtime = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            Err(e) => {
                warn!("Cannot get to file {}: {}", path.display(), e);
                return Ok(false);
            }
        };
        if mtime > published {
            debug!("{} is newer than the published metadata", relative);
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;
    use crate::config::RepoTags;
    use crate::repository::catalog::CatalogEntry;
    use filetime::FileTime;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_walk_finds_packages_sorted() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "b/two.rpm");
        touch(temp.path(), "a/one.RPM");
        touch(temp.path(), "a/readme.txt");
        touch(temp.path(), "repodata/stray.rpm");

        let config = RunConfig::new(temp.path());
        assert_eq!(
            packages(&config).unwrap(),
            vec!["a/one.RPM".to_string(), "b/two.rpm".to_string()]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_skip_symlinks() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "real.rpm");
        std::os::unix::fs::symlink(temp.path().join("real.rpm"), temp.path().join("link.rpm"))
            .unwrap();

        let mut config = RunConfig::new(temp.path());
        assert_eq!(packages(&config).unwrap().len(), 2);

        config.skip_symlinks = true;
        assert_eq!(packages(&config).unwrap(), vec!["real.rpm".to_string()]);
    }

    #[test]
    fn test_excludes_match_path_or_name() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "x86_64/tool-debuginfo-1.rpm");
        touch(temp.path(), "x86_64/tool-1.rpm");
        touch(temp.path(), "src/tool-1.src.rpm");

        let mut config = RunConfig::new(temp.path());
        config.excludes = vec!["*-debuginfo-*".to_string(), "src/*".to_string()];
        assert_eq!(
            packages(&config).unwrap(),
            vec!["x86_64/tool-1.rpm".to_string()]
        );
    }

    #[test]
    fn test_pkglist_replaces_walk() {
        let temp = TempDir::new().unwrap();
        let list = temp.path().join("pkglist");
        fs::write(&list, "# chosen packages\nb.rpm\n\n  a.rpm  \n").unwrap();

        let mut config = RunConfig::new(temp.path());
        config.pkglist = Some(read_pkglist(&list).unwrap());
        assert_eq!(
            packages(&config).unwrap(),
            vec!["b.rpm".to_string(), "a.rpm".to_string()]
        );
    }

    #[test]
    fn test_metadata_is_current() {
        let temp = TempDir::new().unwrap();
        let config = RunConfig::new(temp.path());
        touch(temp.path(), "a.rpm");
        let pkg = temp.path().join("a.rpm");
        filetime::set_file_mtime(&pkg, FileTime::from_unix_time(1_000, 0)).unwrap();
        let list = vec!["a.rpm".to_string()];

        assert!(!metadata_is_current(&config, &list).unwrap());

        fs::create_dir_all(config.final_dir()).unwrap();
        let mut catalog = Catalog::new("1", RepoTags::default());
        catalog.replace(CatalogEntry {
            data_type: "primary".to_string(),
            href: "repodata/primary.xml.gz".to_string(),
            checksum: Checksum::default(),
            timestamp: 2_000,
            ..CatalogEntry::default()
        });
        catalog.save(&config.final_dir().join(CATALOG_FILE)).unwrap();
        assert!(metadata_is_current(&config, &list).unwrap());

        filetime::set_file_mtime(&pkg, FileTime::from_unix_time(3_000, 0)).unwrap();
        assert!(!metadata_is_current(&config, &list).unwrap());
    }
}
