// tests/integration_test.rs

//! Integration tests for repogen
//!
//! These tests run whole generations against real package files.

use repogen::checksum::ChecksumType;
use repogen::compress::{self, Compression};
use repogen::config::CATALOG_FILE;
use repogen::metadata::reader;
use repogen::repository::modify::{self, ModifyOptions};
use repogen::repository::Catalog;
use repogen::RunConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn build_rpm(dir: &Path, name: &str, version: &str) -> PathBuf {
    let pkg = rpm::PackageBuilder::new(name, version, "MIT", "x86_64", "Integration package")
        .release("1")
        .description("Package used by the integration tests")
        .with_file_contents(
            format!("#!/bin/sh\necho {}\n", name).into_bytes(),
            rpm::FileOptions::new(format!("/usr/bin/{}", name)).mode(0o100755),
        )
        .unwrap()
        .requires(rpm::Dependency::any("glibc"))
        .build()
        .unwrap();

    let path = dir.join(format!("{}-{}-1.x86_64.rpm", name, version));
    pkg.write_file(&path).unwrap();
    path
}

fn package_tree() -> TempDir {
    let temp = TempDir::new().unwrap();
    let packages = temp.path().join("Packages");
    fs::create_dir(&packages).unwrap();
    build_rpm(&packages, "alpha", "1.0");
    build_rpm(&packages, "beta", "2.1");
    temp
}

fn published_catalog(config: &RunConfig) -> Catalog {
    Catalog::load(&config.final_dir().join(CATALOG_FILE)).unwrap()
}

fn document(config: &RunConfig, catalog: &Catalog, data_type: &str) -> String {
    let entry = catalog.entry(data_type).unwrap();
    compress::read_to_string(&config.final_dir().join(entry.file_name())).unwrap()
}

#[test]
fn test_generate_repository() {
    let temp = package_tree();
    let config = RunConfig::new(temp.path());

    let summary = repogen::generate(&config).unwrap().unwrap();
    assert_eq!(summary.stats.extracted, 2);
    assert_eq!(summary.stats.skipped, 0);
    assert!(!config.scratch_dir().exists());
    assert!(!config.old_dir().exists());

    let catalog = published_catalog(&config);
    let types: Vec<_> = catalog.entries.iter().map(|e| e.data_type.as_str()).collect();
    assert_eq!(types, vec!["primary", "filelists", "other"]);

    for entry in &catalog.entries {
        let path = config.final_dir().join(entry.file_name());
        assert_eq!(entry.href, format!("repodata/{}", entry.file_name()));
        assert_eq!(
            ChecksumType::Sha256.digest_file(&path).unwrap(),
            entry.checksum.value
        );
        assert_eq!(fs::metadata(&path).unwrap().len(), entry.size.unwrap());

        let content = compress::read_to_string(&path).unwrap();
        assert_eq!(content.len() as u64, entry.open_size.unwrap());
        assert_eq!(
            ChecksumType::Sha256.digest_bytes(content.as_bytes()),
            entry.open_checksum.as_ref().unwrap().value
        );
        assert!(content.contains("packages=\"2\""));
        assert_eq!(reader::package_fragments(&content).unwrap().len(), 2);
    }

    let primary = document(&config, &catalog, "primary");
    let alpha = primary.find("<name>alpha</name>").unwrap();
    let beta = primary.find("<name>beta</name>").unwrap();
    assert!(alpha < beta);
    assert!(primary.contains("<location href=\"Packages/alpha-1.0-1.x86_64.rpm\"/>"));
}

#[test]
fn test_update_reuses_unchanged_packages() {
    let temp = package_tree();
    let config = RunConfig::new(temp.path());
    repogen::generate(&config).unwrap();
    let first = published_catalog(&config);
    let before: Vec<_> = ["primary", "filelists", "other"]
        .iter()
        .map(|t| document(&config, &first, t))
        .collect();

    let mut update = config.clone();
    update.update = true;
    let summary = repogen::generate(&update).unwrap().unwrap();
    assert_eq!(summary.stats.reused, 2);
    assert_eq!(summary.stats.extracted, 0);

    let second = published_catalog(&update);
    let after: Vec<_> = ["primary", "filelists", "other"]
        .iter()
        .map(|t| document(&update, &second, t))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn test_update_extracts_new_package() {
    let temp = package_tree();
    let mut config = RunConfig::new(temp.path());
    config.update = true;
    repogen::generate(&config).unwrap();

    build_rpm(&temp.path().join("Packages"), "gamma", "0.3");
    let summary = repogen::generate(&config).unwrap().unwrap();
    assert_eq!(summary.stats.reused, 2);
    assert_eq!(summary.stats.extracted, 1);

    let catalog = published_catalog(&config);
    let primary = document(&config, &catalog, "primary");
    assert!(primary.contains("packages=\"3\""));
    assert!(primary.contains("<name>gamma</name>"));
}

#[test]
fn test_workers_match_in_process_output() {
    let temp = package_tree();
    build_rpm(&temp.path().join("Packages"), "gamma", "0.3");
    let serial_out = TempDir::new().unwrap();
    let parallel_out = TempDir::new().unwrap();

    let mut serial = RunConfig::new(temp.path());
    serial.output_dir = serial_out.path().to_path_buf();
    repogen::generate(&serial).unwrap();

    let mut parallel = serial.clone();
    parallel.output_dir = parallel_out.path().to_path_buf();
    parallel.workers = 2;
    parallel.worker_program = Some(PathBuf::from(env!("CARGO_BIN_EXE_repogen")));
    let summary = repogen::generate(&parallel).unwrap().unwrap();
    assert_eq!(summary.stats.extracted, 3);

    let serial_catalog = published_catalog(&serial);
    let parallel_catalog = published_catalog(&parallel);
    for data_type in ["primary", "filelists", "other"] {
        assert_eq!(
            document(&serial, &serial_catalog, data_type),
            document(&parallel, &parallel_catalog, data_type)
        );
    }
}

#[test]
fn test_databases_and_unique_names() {
    let temp = package_tree();
    let mut config = RunConfig::new(temp.path());
    config.database = true;
    config.unique_md_filenames = true;
    config.compression = Compression::Xz;
    repogen::generate(&config).unwrap();

    let catalog = published_catalog(&config);
    let primary = catalog.entry("primary").unwrap();
    assert_eq!(
        primary.file_name(),
        format!("{}-primary.xml.xz", primary.checksum.value)
    );

    let db_entry = catalog.entry("primary_db").unwrap();
    assert_eq!(db_entry.database_version, Some(repogen::db::DB_VERSION));
    assert!(db_entry.file_name().ends_with("-primary.sqlite.bz2"));

    let unpacked = temp.path().join("primary.sqlite");
    let mut input =
        compress::open_maybe_compressed(&config.final_dir().join(db_entry.file_name())).unwrap();
    std::io::copy(&mut input, &mut fs::File::create(&unpacked).unwrap()).unwrap();

    let conn = rusqlite::Connection::open(&unpacked).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 2);
    let checksum: String = conn
        .query_row("SELECT checksum FROM db_info", [], |row| row.get(0))
        .unwrap();
    assert_eq!(checksum, primary.open_checksum.as_ref().unwrap().value);
}

#[test]
fn test_checkts_skips_current_metadata() {
    let temp = package_tree();
    let mut config = RunConfig::new(temp.path());
    repogen::generate(&config).unwrap();
    let published = fs::read(config.final_dir().join(CATALOG_FILE)).unwrap();

    config.checkts = true;
    assert!(repogen::generate(&config).unwrap().is_none());
    assert_eq!(fs::read(config.final_dir().join(CATALOG_FILE)).unwrap(), published);
}

#[test]
fn test_modify_published_repository() {
    let temp = package_tree();
    let config = RunConfig::new(temp.path());
    repogen::generate(&config).unwrap();

    let updateinfo = temp.path().join("updateinfo.xml");
    fs::write(&updateinfo, "<updates/>\n").unwrap();
    let entry = modify::add(&config.final_dir(), &updateinfo, &ModifyOptions::default()).unwrap();

    let catalog = published_catalog(&config);
    assert_eq!(catalog.entries.len(), 4);
    assert_eq!(catalog.entry("updateinfo"), Some(&entry));

    // A new generation replaces the whole catalog and its files
    repogen::generate(&config).unwrap();
    assert!(!config.final_dir().join(entry.file_name()).exists());
    assert_eq!(published_catalog(&config).entries.len(), 3);

    assert!(
        modify::remove(&config.final_dir(), "updateinfo", None)
            .unwrap()
            .is_none()
    );
}
