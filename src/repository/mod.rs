// src/repository/mod.rs

//! Repository metadata generation
//!
//! Ties the pieces of a run together: enumerate the packages, load the
//! reuse index, write the documents, catalog them and publish.

pub mod catalog;
pub mod modify;
pub mod publish;
pub mod reuse;
pub mod scan;
pub mod writer;

pub use catalog::{Catalog, CatalogEntry};
pub use reuse::ReuseIndex;
pub use writer::{MetadataWriter, RunStats, RunSummary};

use crate::config::RunConfig;
use crate::error::Result;
use crate::packages::PackageSource;
use tracing::{info, warn};

/// Generate and publish the metadata for `config.package_dir`
///
/// Returns `None` when `checkts` found the published metadata current and
/// nothing was written.
pub fn generate(config: &RunConfig) -> Result<Option<RunSummary>> {
    config.validate()?;

    let packages = scan::packages(config)?;
    if config.checkts && scan::metadata_is_current(config, &packages)? {
        info!("repodata is up to date");
        return Ok(None);
    }

    publish::prepare(config)?;

    let reuse = if config.update {
        match ReuseIndex::load(config) {
            Ok(index) => index,
            Err(e) => {
                warn!("Cannot reuse previous metadata, extracting everything: {}", e);
                ReuseIndex::default()
            }
        }
    } else {
        ReuseIndex::default()
    };

    let mut writer = MetadataWriter::open(config, packages.len(), reuse)?;
    writer.populate(packages.into_iter().map(PackageSource::Path).collect())?;
    let summary = writer.close()?.catalog()?.publish()?;

    info!(
        "Published {} packages to {}",
        summary.stats.reused + summary.stats.extracted,
        config.final_dir().display()
    );
    Ok(Some(summary))
}
