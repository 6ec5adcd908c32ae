// src/worker/run.rs

//! The worker side of the pool
//!
//! Extracts every package of its chunk in order and writes three flat
//! fragment files, one fragment per package followed by a newline. A
//! package that fails is logged and skipped.

use crate::error::{Error, Result};
use crate::metadata::{DocumentKind, Fragments};
use crate::packages;
use crate::worker::request::{WorkerReport, WorkerRequest, REPORT_FILE};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Fragment file for `kind` inside a worker directory
pub fn fragment_path(dir: &Path, kind: DocumentKind) -> PathBuf {
    dir.join(kind.xml_name())
}

/// Serve the request stored at `request_path`
pub fn run(request_path: &Path) -> Result<WorkerReport> {
    let request = WorkerRequest::load(request_path)?;
    execute(&request)
}

/// Extract the request's chunk and write the fragment files and report
pub fn execute(request: &WorkerRequest) -> Result<WorkerReport> {
    let filter = request.options.primary_filter()?;
    let mut outputs = Vec::with_capacity(DocumentKind::ALL.len());
    for kind in DocumentKind::ALL {
        let path = fragment_path(&request.output_dir, kind);
        let file = File::create(&path).map_err(|e| Error::document(&path, e))?;
        outputs.push((path, BufWriter::new(file)));
    }

    let mut report = WorkerReport::new();
    for relative in &request.packages {
        let path = request.package_dir.join(relative);
        let record = match packages::extract(&path, relative, &request.options) {
            Ok(record) => record,
            Err(e) => {
                error!("{}", e);
                report.failed.push(relative.clone());
                continue;
            }
        };

        let fragments = Fragments::render(&record, &filter);
        for (kind, (path, out)) in DocumentKind::ALL.iter().zip(outputs.iter_mut()) {
            writeln!(out, "{}", fragments.get(*kind)).map_err(|e| Error::document(&*path, e))?;
        }
        report.written += 1;
    }

    for (path, out) in outputs {
        let file = out
            .into_inner()
            .map_err(|e| Error::document(&path, e.into_error()))?;
        file.sync_all().map_err(|e| Error::document(&path, e))?;
    }

    report.save(&request.output_dir.join(REPORT_FILE))?;
    info!(
        "Worker {} wrote {} packages, {} failed",
        request.worker,
        report.written,
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractOptions;
    use crate::packages::rpm::tests::build_test_rpm;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_worker_writes_fragments_in_chunk_order() {
        let repo = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        build_test_rpm(repo.path(), "beta", "1.0");
        build_test_rpm(repo.path(), "alpha", "1.0");
        fs::write(repo.path().join("broken.rpm"), b"not a package").unwrap();

        let request = WorkerRequest::new(
            0,
            repo.path(),
            out.path(),
            vec![
                "beta-1.0-1.x86_64.rpm".to_string(),
                "broken.rpm".to_string(),
                "alpha-1.0-1.x86_64.rpm".to_string(),
            ],
            ExtractOptions::default(),
        );
        let path = out.path().join("request.json");
        request.save(&path).unwrap();

        let report = run(&path).unwrap();
        assert_eq!(report.written, 2);
        assert_eq!(report.failed, vec!["broken.rpm".to_string()]);
        assert_eq!(WorkerReport::load(&out.path().join(REPORT_FILE)).unwrap(), report);

        let primary = fs::read_to_string(fragment_path(out.path(), DocumentKind::Primary)).unwrap();
        let beta = primary.find("<name>beta</name>").unwrap();
        let alpha = primary.find("<name>alpha</name>").unwrap();
        assert!(beta < alpha);
        assert!(primary.ends_with("</package>\n"));

        let other = fs::read_to_string(fragment_path(out.path(), DocumentKind::Other)).unwrap();
        assert_eq!(other.matches("<package ").count(), 2);
    }
}
