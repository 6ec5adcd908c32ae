// src/repository/publish.rs

//! Atomic replacement of the published metadata directory
//!
//! A run writes into the scratch directory. Publishing renames the current
//! directory aside, renames scratch into its place and then sorts out the
//! files of the old directory: the ones the old catalog listed are deleted,
//! foreign ones (added by other tools) are carried over unless the new run
//! produced a file of the same name.

use crate::config::{RunConfig, CATALOG_FILE};
use crate::error::{Error, Result};
use crate::repository::catalog::Catalog;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// Get the output directory ready for a new run
///
/// Recovers from an interrupted publish, then claims the scratch directory.
/// An existing scratch directory belongs to another run (or to a crashed
/// one, which needs manual cleanup) and makes the run fail.
pub fn prepare(config: &RunConfig) -> Result<()> {
    let final_dir = config.final_dir();
    let old_dir = config.old_dir();
    let scratch_dir = config.scratch_dir();

    if old_dir.exists() {
        if final_dir.exists() {
            return Err(Error::Publish(format!(
                "Old data directory exists, please remove: {}",
                old_dir.display()
            )));
        }
        warn!(
            "Restoring {} left behind by an interrupted run",
            old_dir.display()
        );
        fs::rename(&old_dir, &final_dir).map_err(|e| {
            Error::Publish(format!("Cannot restore {}: {}", old_dir.display(), e))
        })?;
    }

    // create_dir fails if the directory exists, so only one run gets it
    match fs::create_dir(&scratch_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(Error::Publish(format!(
                "Scratch directory {} already exists, another run may be in progress",
                scratch_dir.display()
            )));
        }
        Err(e) => return Err(Error::document(&scratch_dir, e)),
    }
    debug!("Created scratch directory {}", scratch_dir.display());
    Ok(())
}

/// Swap the scratch directory into place
pub fn publish(config: &RunConfig) -> Result<()> {
    let final_dir = config.final_dir();
    let old_dir = config.old_dir();
    let scratch_dir = config.scratch_dir();

    if !final_dir.exists() {
        fs::rename(&scratch_dir, &final_dir).map_err(|e| {
            Error::Publish(format!(
                "Cannot move {} to {}: {}",
                scratch_dir.display(),
                final_dir.display(),
                e
            ))
        })?;
        info!("Published {}", final_dir.display());
        return Ok(());
    }

    let owned = owned_files(&final_dir);

    fs::rename(&final_dir, &old_dir).map_err(|e| {
        Error::Publish(format!(
            "Cannot move {} to {}: {}",
            final_dir.display(),
            old_dir.display(),
            e
        ))
    })?;

    if let Err(e) = fs::rename(&scratch_dir, &final_dir) {
        // Put the previous metadata back before giving up
        if let Err(restore) = fs::rename(&old_dir, &final_dir) {
            warn!(
                "Could not restore {} from {}: {}",
                final_dir.display(),
                old_dir.display(),
                restore
            );
        }
        return Err(Error::Publish(format!(
            "Cannot move {} to {}: {}",
            scratch_dir.display(),
            final_dir.display(),
            e
        )));
    }

    sweep_old(&old_dir, &final_dir, &owned)
        .map_err(|e| Error::Publish(format!("Cannot clean up {}: {}", old_dir.display(), e)))?;

    info!("Published {}", final_dir.display());
    Ok(())
}

/// File names the catalog in `dir` accounts for
fn owned_files(dir: &Path) -> HashSet<String> {
    let mut owned = HashSet::new();
    owned.insert(CATALOG_FILE.to_string());

    let catalog_path = dir.join(CATALOG_FILE);
    if !catalog_path.exists() {
        return owned;
    }
    match Catalog::load(&catalog_path) {
        Ok(catalog) => {
            for entry in &catalog.entries {
                owned.insert(entry.file_name().to_string());
            }
        }
        Err(e) => warn!(
            "Could not read previous catalog {}: {}",
            catalog_path.display(),
            e
        ),
    }
    owned
}

fn sweep_old(old_dir: &Path, final_dir: &Path, owned: &HashSet<String>) -> io::Result<()> {
    for entry in fs::read_dir(old_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        let target = final_dir.join(&name);

        if owned.contains(&name) || target.exists() {
            debug!("Discarding {}", path.display());
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        } else {
            debug!("Keeping foreign file {}", name);
            fs::rename(&path, &target)?;
        }
    }
    fs::remove_dir(old_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{Checksum, ChecksumType};
    use crate::config::RepoTags;
    use crate::repository::catalog::CatalogEntry;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RunConfig) {
        let temp = TempDir::new().unwrap();
        let config = RunConfig::new(temp.path());
        (temp, config)
    }

    fn write_catalog(dir: &Path, hrefs: &[&str]) {
        let mut catalog = Catalog::new("1", RepoTags::default());
        for (i, href) in hrefs.iter().enumerate() {
            catalog.replace(CatalogEntry {
                data_type: format!("type{}", i),
                href: href.to_string(),
                checksum: Checksum::new(ChecksumType::Sha256, "00"),
                ..CatalogEntry::default()
            });
        }
        catalog.save(&dir.join(CATALOG_FILE)).unwrap();
    }

    #[test]
    fn test_first_publish() {
        let (_temp, config) = setup();
        prepare(&config).unwrap();
        fs::write(config.scratch_dir().join("primary.xml.gz"), b"new").unwrap();

        publish(&config).unwrap();

        assert!(config.final_dir().join("primary.xml.gz").exists());
        assert!(!config.scratch_dir().exists());
        assert!(!config.old_dir().exists());
    }

    #[test]
    fn test_publish_keeps_foreign_files() {
        let (_temp, config) = setup();
        let final_dir = config.final_dir();
        fs::create_dir_all(&final_dir).unwrap();
        write_catalog(&final_dir, &["repodata/primary.xml.gz"]);
        fs::write(final_dir.join("primary.xml.gz"), b"old").unwrap();
        fs::write(final_dir.join("comps.xml"), b"foreign").unwrap();
        fs::write(final_dir.join("other.xml.gz"), b"unlisted old").unwrap();

        prepare(&config).unwrap();
        fs::write(config.scratch_dir().join("primary.xml.gz"), b"new").unwrap();
        fs::write(config.scratch_dir().join("other.xml.gz"), b"new other").unwrap();
        publish(&config).unwrap();

        assert_eq!(fs::read(final_dir.join("primary.xml.gz")).unwrap(), b"new");
        assert_eq!(fs::read(final_dir.join("comps.xml")).unwrap(), b"foreign");
        assert_eq!(fs::read(final_dir.join("other.xml.gz")).unwrap(), b"new other");
        assert!(!config.old_dir().exists());
    }

    #[test]
    fn test_prepare_restores_interrupted_swap() {
        let (_temp, config) = setup();
        fs::create_dir_all(config.old_dir()).unwrap();
        fs::write(config.old_dir().join(CATALOG_FILE), b"x").unwrap();

        prepare(&config).unwrap();

        assert!(config.final_dir().join(CATALOG_FILE).exists());
        assert!(!config.old_dir().exists());
        assert!(config.scratch_dir().is_dir());
    }

    #[test]
    fn test_prepare_refuses_ambiguous_state() {
        let (_temp, config) = setup();
        fs::create_dir_all(config.old_dir()).unwrap();
        fs::create_dir_all(config.final_dir()).unwrap();

        assert!(matches!(prepare(&config), Err(Error::Publish(_))));
    }

    #[test]
    fn test_prepare_refuses_existing_scratch() {
        let (_temp, config) = setup();
        prepare(&config).unwrap();
        fs::write(config.scratch_dir().join("primary.xml.gz"), b"first run").unwrap();

        assert!(matches!(prepare(&config), Err(Error::Publish(_))));
        assert_eq!(
            fs::read(config.scratch_dir().join("primary.xml.gz")).unwrap(),
            b"first run"
        );
    }

    #[test]
    fn test_failed_swap_restores_previous_metadata() {
        let (_temp, config) = setup();
        let final_dir = config.final_dir();
        fs::create_dir_all(&final_dir).unwrap();
        write_catalog(&final_dir, &["repodata/primary.xml.gz"]);
        fs::write(final_dir.join("primary.xml.gz"), b"old").unwrap();

        // No scratch directory: the second rename of the swap fails
        assert!(matches!(publish(&config), Err(Error::Publish(_))));

        assert!(!config.old_dir().exists());
        assert_eq!(fs::read(final_dir.join("primary.xml.gz")).unwrap(), b"old");
        let catalog = Catalog::load(&final_dir.join(CATALOG_FILE)).unwrap();
        assert_eq!(catalog.entries[0].href, "repodata/primary.xml.gz");
    }
}
