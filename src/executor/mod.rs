//! # Hybrid Executor
//!
//! One invocation contract for blocking and non-blocking callables.
//!
//! - **Non-blocking** callables (`async` closures) are awaited directly on
//!   the caller's tokio task. No thread hand-off.
//! - **Blocking** callables are sent to the shared [`WorkerPool`] and the
//!   caller suspends until a worker finishes them. When every worker is
//!   busy the job queues; it never fails for lack of capacity.
//!
//! The mode is fixed when the [`Callable`] is constructed
//! ([`Callable::blocking`] / [`Callable::non_blocking`]) and never
//! re-examined per call.
//!
//! ## Errors
//!
//! A callable's `anyhow::Error` comes back unchanged inside
//! [`ExecutionError::Failed`], so its concrete type is still reachable with
//! `downcast_ref`. Panics on either path are caught and reported as
//! [`ExecutionError::Panicked`].
//!
//! ## Cancellation
//!
//! Dropping the future returned by [`HybridExecutor::invoke`] stops a
//! non-blocking callable at its next suspension point. A blocking callable
//! already handed to a worker keeps running to completion; its result is
//! discarded. OS threads cannot be interrupted.
//!
//! [`WorkerPool`]: crate::worker_pool::WorkerPool

mod core;

pub use core::{BoxFuture, Callable, CallableId, ExecutionError, ExecutionMode, HybridExecutor};
