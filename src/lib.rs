// src/lib.rs

//! repogen: repository metadata generator for RPM package trees
//!
//! Builds the `repodata/` index consumed by RPM package managers: the
//! primary, filelists and other documents plus the `repomd.xml` catalog
//! binding them together.
//!
//! # Architecture
//!
//! - Extraction: `packages` reads archives into `PackageRecord`s, with a
//!   content-addressed checksum `cache`
//! - Documents: `metadata` renders and parses the per-package fragments
//! - Runs: `repository` writes, catalogs and atomically publishes the
//!   documents, reusing unchanged fragments on incremental runs
//! - Parallelism: `worker` spreads extraction over child processes
//! - Optional sqlite forms of the documents live in `db`

pub mod cache;
pub mod checksum;
pub mod compress;
pub mod config;
pub mod db;
pub mod error;
pub mod metadata;
pub mod packages;
pub mod repository;
pub mod worker;

pub use config::RunConfig;
pub use error::{Error, PackageError, Result};
pub use repository::{generate, RunSummary};
