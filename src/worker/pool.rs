// src/worker/pool.rs

//! Supervisor side of the worker pool
//!
//! Pending packages are split into contiguous chunks, one per worker
//! process. Worker output is relayed line by line with a worker prefix.
//! Results come back in worker order, so the global package order is the
//! chunk order rather than the exact input order.

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::metadata::DocumentKind;
use crate::worker::request::{WorkerReport, WorkerRequest, REPORT_FILE, REQUEST_FILE};
use crate::worker::run::fragment_path;
use std::io::{BufRead, BufReader, Read};
use std::ops::Range;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Split `len` items into at most `workers` near-equal contiguous ranges
///
/// Empty ranges are left out.
pub fn chunk_ranges(len: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    (0..workers)
        .map(|i| (i * len / workers)..((i + 1) * len / workers))
        .filter(|r| !r.is_empty())
        .collect()
}

/// A finished worker's fragment files
#[derive(Debug)]
pub struct WorkerOutput {
    pub index: usize,
    pub dir: PathBuf,
    pub report: WorkerReport,
}

impl WorkerOutput {
    pub fn fragment_path(&self, kind: DocumentKind) -> PathBuf {
        fragment_path(&self.dir, kind)
    }
}

/// Output of a whole pool run
///
/// The worker directories are removed when this is dropped.
#[derive(Debug)]
pub struct PoolOutput {
    pub workers: Vec<WorkerOutput>,
    _scratch: TempDir,
}

struct RunningWorker {
    index: usize,
    dir: PathBuf,
    child: Child,
    relays: Vec<JoinHandle<()>>,
    status: Option<ExitStatus>,
    lost: bool,
}

/// Launches and supervises worker processes for one run
pub struct WorkerPool<'a> {
    config: &'a RunConfig,
    program: PathBuf,
}

impl<'a> WorkerPool<'a> {
    pub fn new(config: &'a RunConfig) -> Result<Self> {
        Ok(Self {
            config,
            program: config.worker_program()?,
        })
    }

    /// Extract `pending` across the configured number of workers
    pub fn run(&self, pending: &[String]) -> Result<PoolOutput> {
        let scratch = tempfile::Builder::new()
            .prefix("workers-")
            .tempdir_in(self.config.scratch_dir())?;

        let ranges = chunk_ranges(pending.len(), self.config.workers);
        info!(
            "Extracting {} packages with {} workers",
            pending.len(),
            ranges.len()
        );

        let mut running = Vec::with_capacity(ranges.len());
        for (index, range) in ranges.into_iter().enumerate() {
            let dir = scratch.path().join(format!("worker-{}", index));
            std::fs::create_dir(&dir).map_err(|e| Error::document(&dir, e))?;

            let request = WorkerRequest::new(
                index,
                &self.config.package_dir,
                &dir,
                pending[range].to_vec(),
                self.config.extract.clone(),
            );
            let request_path = dir.join(REQUEST_FILE);
            request.save(&request_path)?;

            match self.spawn(index, dir, &request_path) {
                Ok(worker) => running.push(worker),
                Err(e) => {
                    for mut worker in running {
                        let _ = worker.child.kill();
                        let _ = worker.child.wait();
                    }
                    return Err(e);
                }
            }
        }

        self.wait_all(&mut running);

        let mut workers = Vec::with_capacity(running.len());
        for worker in running {
            workers.push(collect(worker)?);
        }

        Ok(PoolOutput {
            workers,
            _scratch: scratch,
        })
    }

    fn spawn(&self, index: usize, dir: PathBuf, request: &std::path::Path) -> Result<RunningWorker> {
        debug!("Starting worker {} with {}", index, request.display());
        let mut child = Command::new(&self.program)
            .arg("worker")
            .arg("--request")
            .arg(request)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::WorkerProcess(format!(
                    "Cannot start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let mut relays = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            relays.push(relay(index, stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            relays.push(relay(index, stderr, true));
        }

        Ok(RunningWorker {
            index,
            dir,
            child,
            relays,
            status: None,
            lost: false,
        })
    }

    /// Poll until every worker has exited
    fn wait_all(&self, running: &mut [RunningWorker]) {
        loop {
            let mut active = 0;
            for worker in running.iter_mut().filter(|w| w.status.is_none() && !w.lost) {
                match worker.child.try_wait() {
                    Ok(Some(status)) => {
                        debug!("Worker {} exited with {}", worker.index, status);
                        worker.status = Some(status);
                    }
                    Ok(None) => active += 1,
                    Err(e) => {
                        warn!("Lost track of worker {}: {}", worker.index, e);
                        let _ = worker.child.kill();
                        let _ = worker.child.wait();
                        worker.lost = true;
                    }
                }
            }
            if active == 0 {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

// One thread per pipe: the supervisor itself only polls exit status, and an
// undrained pipe would stall a chatty worker between polls.
fn relay<R: Read + Send + 'static>(index: usize, pipe: R, errors: bool) -> JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(pipe).lines() {
            match line {
                Ok(line) if errors => warn!("worker {}: {}", index, line),
                Ok(line) => info!("worker {}: {}", index, line),
                Err(_) => break,
            }
        }
    })
}

fn collect(worker: RunningWorker) -> Result<WorkerOutput> {
    for handle in worker.relays {
        let _ = handle.join();
    }

    match worker.status {
        Some(status) if status.success() => {}
        Some(status) => {
            return Err(Error::WorkerProcess(format!(
                "worker {} exited with {}",
                worker.index, status
            )))
        }
        None => {
            return Err(Error::WorkerProcess(format!(
                "worker {} was killed after losing track of it",
                worker.index
            )))
        }
    }

    let report = WorkerReport::load(&worker.dir.join(REPORT_FILE))?;
    for kind in DocumentKind::ALL {
        let path = fragment_path(&worker.dir, kind);
        if !path.is_file() {
            return Err(Error::WorkerProcess(format!(
                "worker {} left no {}",
                worker.index,
                path.display()
            )));
        }
    }

    Ok(WorkerOutput {
        index: worker.index,
        dir: worker.dir,
        report,
    })
}
