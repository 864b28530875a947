//! # Worker Pool Module
//!
//! Fixed-size pool of OS threads that runs blocking work on behalf of the
//! async dispatch path.
//!
//! ## Features
//!
//! - **Fixed size**: `num_workers` named threads, spawned once at startup
//! - **Unbounded queue**: all workers pull from one crossbeam MPMC channel;
//!   when every worker is busy, new jobs wait in line rather than failing
//! - **Panic isolation**: each job runs under `catch_unwind`, so a panicking
//!   job never takes a worker down
//! - **Metrics**: queue depth, active workers, dispatched/completed/panicked counts
//!
//! ## Cancellation
//!
//! A running job cannot be interrupted. If the caller stops waiting for the
//! result (its future is dropped), the job still runs to completion and the
//! result is discarded.

use serde::Serialize;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Result delivered for a submitted job: the closure's value or its panic payload
pub type JobResult<T> = thread::Result<T>;

/// Submission rejected because the pool has been shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("worker pool is shut down")]
pub struct PoolClosed;

/// Configuration for a worker pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker threads
    pub num_workers: usize,
    /// Queue depth above which a backpressure warning is logged (not enforced)
    pub queue_warn: usize,
    /// Stack size for each worker thread in bytes
    pub stack_size: usize,
    /// Thread name prefix; workers are named `{prefix}-{n}`
    pub thread_name: String,
}

impl WorkerPoolConfig {
    /// Create a custom configuration
    #[must_use]
    pub fn new(num_workers: usize, queue_warn: usize, stack_size: usize) -> Self {
        Self {
            num_workers,
            queue_warn,
            stack_size,
            ..Self::default()
        }
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 10,
            queue_warn: 1024,
            stack_size: 0x20_0000, // 2MB
            thread_name: "switchyard-blocking".to_string(),
        }
    }
}

/// Metrics for a worker pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Jobs waiting for a worker
    pub queue_depth: AtomicUsize,
    /// Jobs currently running
    pub active: AtomicUsize,
    /// Total jobs accepted
    pub dispatched_count: AtomicU64,
    /// Total jobs finished (including panicked ones)
    pub completed_count: AtomicU64,
    /// Jobs that panicked
    pub panicked_count: AtomicU64,
}

/// Point-in-time copy of [`WorkerPoolMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WorkerPoolSnapshot {
    /// Number of worker threads
    pub workers: usize,
    /// Jobs waiting for a worker
    pub queue_depth: usize,
    /// Jobs currently running
    pub active: usize,
    /// Total jobs accepted
    pub dispatched: u64,
    /// Total jobs finished
    pub completed: u64,
    /// Jobs that panicked
    pub panicked: u64,
}

impl WorkerPoolMetrics {
    /// Create new metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted job; returns the new queue depth
    pub fn record_dispatch(&self) -> usize {
        self.dispatched_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Undo a dispatch whose send failed
    pub fn record_rejected(&self) {
        self.dispatched_count.fetch_sub(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    /// A worker picked a job off the queue
    pub fn record_start(&self) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// A job finished (successfully or not)
    pub fn record_completion(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.completed_count.fetch_add(1, Ordering::Relaxed);
    }

    /// A job panicked
    pub fn record_panic(&self) {
        self.panicked_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current queue depth
    #[must_use]
    pub fn get_queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    /// Get number of running jobs
    #[must_use]
    pub fn get_active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Get total dispatched count
    #[must_use]
    pub fn get_dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    /// Get total completed count
    #[must_use]
    pub fn get_completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }

    /// Get panicked job count
    #[must_use]
    pub fn get_panicked_count(&self) -> u64 {
        self.panicked_count.load(Ordering::Relaxed)
    }
}

/// Shared pool of blocking worker threads.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    sender: parking_lot::Mutex<Option<Sender<Job>>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<WorkerPoolMetrics>,
}

impl WorkerPool {
    /// Spawn the worker threads.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a thread cannot be spawned; threads spawned
    /// before the failure exit once the half-built pool is dropped.
    pub fn new(config: WorkerPoolConfig) -> std::io::Result<Self> {
        let (tx, rx) = channel::unbounded::<Job>();
        let metrics = Arc::new(WorkerPoolMetrics::new());

        info!(
            num_workers = config.num_workers,
            queue_warn = config.queue_warn,
            stack_size = config.stack_size,
            thread_name = %config.thread_name,
            "Creating worker pool"
        );

        let mut workers = Vec::with_capacity(config.num_workers);
        for worker_id in 0..config.num_workers {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{worker_id}", config.thread_name))
                .stack_size(config.stack_size)
                .spawn(move || run_worker(worker_id, &rx));

            match handle {
                Ok(h) => workers.push(h),
                Err(e) => {
                    error!(worker_id, error = %e, "Failed to spawn worker thread");
                    return Err(e);
                }
            }
        }

        Ok(Self {
            config,
            sender: parking_lot::Mutex::new(Some(tx)),
            workers: parking_lot::Mutex::new(workers),
            metrics,
        })
    }

    /// Queue `f` for execution on a worker thread.
    ///
    /// The returned receiver yields `Ok(value)` or `Err(panic payload)`.
    /// Dropping the receiver does not cancel the job.
    ///
    /// # Errors
    ///
    /// [`PoolClosed`] after [`WorkerPool::shutdown`].
    pub fn submit<F, T>(&self, f: F) -> Result<oneshot::Receiver<JobResult<T>>, PoolClosed>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.sender.lock().as_ref().cloned().ok_or(PoolClosed)?;
        let (tx, rx) = oneshot::channel();
        let metrics = Arc::clone(&self.metrics);

        let job: Job = Box::new(move || {
            metrics.record_start();
            let result = catch_unwind(AssertUnwindSafe(f));
            if let Err(payload) = &result {
                metrics.record_panic();
                // WP2: Job panicked
                error!(
                    panic_message = %panic_message(payload.as_ref()),
                    "Blocking job panicked"
                );
            }
            metrics.record_completion();
            if tx.send(result).is_err() {
                // WP3: Caller went away
                debug!("Blocking job finished after caller dropped; result discarded");
            }
        });

        let depth = self.metrics.record_dispatch();
        if depth > self.config.queue_warn {
            // WP4: Backpressure
            warn!(
                queue_depth = depth,
                queue_warn = self.config.queue_warn,
                num_workers = self.config.num_workers,
                "Blocking queue depth above warning threshold"
            );
        }

        if sender.send(job).is_err() {
            self.metrics.record_rejected();
            error!("Worker pool channel disconnected");
            return Err(PoolClosed);
        }
        Ok(rx)
    }

    /// Stop accepting jobs, let queued jobs drain, then join the workers.
    ///
    /// Blocks the calling thread until every worker has exited. Idempotent.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let count = workers.len();
        for handle in workers {
            if handle.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }
        info!(workers = count, "Worker pool shut down");
    }

    /// `true` once [`WorkerPool::shutdown`] has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Get metrics for this worker pool
    #[must_use]
    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }

    /// Snapshot of the current metrics
    #[must_use]
    pub fn snapshot(&self) -> WorkerPoolSnapshot {
        WorkerPoolSnapshot {
            workers: self.config.num_workers,
            queue_depth: self.metrics.get_queue_depth(),
            active: self.metrics.get_active(),
            dispatched: self.metrics.get_dispatched_count(),
            completed: self.metrics.get_completed_count(),
            panicked: self.metrics.get_panicked_count(),
        }
    }

    /// Get configuration for this worker pool
    #[must_use]
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue is enough; detached workers exit after draining
        self.sender.lock().take();
    }
}

/// Worker loop: runs jobs until the queue is closed and drained
fn run_worker(worker_id: usize, rx: &Receiver<Job>) {
    // WP1: Worker started
    debug!(worker_id, "Worker thread started");
    for job in rx.iter() {
        job();
    }
    debug!(worker_id, "Worker thread exiting");
}

/// Best-effort text of a panic payload
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
