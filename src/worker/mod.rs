// src/worker/mod.rs

//! Parallel extraction in separate processes
//!
//! Each worker is a fresh invocation of the repogen binary running the
//! `worker` subcommand. Workers share nothing with the supervisor but
//! their scratch directory and their stdio pipes.

pub mod pool;
pub mod request;
pub mod run;

pub use pool::{chunk_ranges, PoolOutput, WorkerOutput, WorkerPool};
pub use request::{WorkerReport, WorkerRequest};
pub use run::run;
