use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error};

use crate::context::Arguments;
use crate::worker_pool::{panic_message, WorkerPool, WorkerPoolConfig};

/// Boxed, sendable future returned by non-blocking callables
pub type BoxFuture<T> = futures::future::BoxFuture<'static, T>;

type BlockingFn<T> = dyn Fn(Arguments) -> anyhow::Result<T> + Send + Sync;
type NonBlockingFn<T> = dyn Fn(Arguments) -> BoxFuture<anyhow::Result<T>> + Send + Sync;

/// How a callable is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Runs on the blocking worker pool
    Blocking,
    /// Awaited on the caller's task
    NonBlocking,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Blocking => "blocking",
            Self::NonBlocking => "non_blocking",
        })
    }
}

/// Stable identity of a callable, shared by all of its clones.
///
/// Used as the cache key for dependency providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallableId(usize);

enum Inner<T> {
    Blocking(Arc<BlockingFn<T>>),
    NonBlocking(Arc<NonBlockingFn<T>>),
}

/// A handler or provider together with its execution mode.
///
/// Cloning is cheap and keeps the same [`CallableId`].
pub struct Callable<T> {
    inner: Inner<T>,
    label: Arc<str>,
}

impl<T> Clone for Callable<T> {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            Inner::Blocking(f) => Inner::Blocking(Arc::clone(f)),
            Inner::NonBlocking(f) => Inner::NonBlocking(Arc::clone(f)),
        };
        Self {
            inner,
            label: Arc::clone(&self.label),
        }
    }
}

impl<T> fmt::Debug for Callable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("label", &self.label)
            .field("mode", &self.mode())
            .finish()
    }
}

impl<T: 'static> Callable<T> {
    /// Wrap a synchronous function; it will run on the worker pool.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(Arguments) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            inner: Inner::Blocking(Arc::new(f)),
            label: Arc::from(std::any::type_name::<F>()),
        }
    }

    /// Wrap an async function; it will be awaited on the caller's task.
    pub fn non_blocking<F, Fut>(f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let boxed = move |args: Arguments| -> BoxFuture<anyhow::Result<T>> { f(args).boxed() };
        Self {
            inner: Inner::NonBlocking(Arc::new(boxed)),
            label: Arc::from(std::any::type_name::<F>()),
        }
    }
}

impl<T> Callable<T> {
    /// Replace the label used in logs (defaults to the closure's type name)
    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Arc::from(label);
        self
    }

    /// Label used in logs
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Execution mode chosen at construction
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        match self.inner {
            Inner::Blocking(_) => ExecutionMode::Blocking,
            Inner::NonBlocking(_) => ExecutionMode::NonBlocking,
        }
    }

    /// Identity shared by all clones of this callable
    #[must_use]
    pub fn identity(&self) -> CallableId {
        let ptr = match &self.inner {
            Inner::Blocking(f) => Arc::as_ptr(f).cast::<()>(),
            Inner::NonBlocking(f) => Arc::as_ptr(f).cast::<()>(),
        };
        CallableId(ptr as usize)
    }
}

/// Failure of one invocation
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The callable returned an error; kept unchanged
    #[error(transparent)]
    Failed(anyhow::Error),
    /// The callable panicked
    #[error("callable panicked: {0}")]
    Panicked(String),
    /// The blocking pool no longer accepts work
    #[error("blocking worker pool is shut down")]
    PoolClosed,
}

impl ExecutionError {
    /// Downcast the wrapped error, if the callable failed with an `E`
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Self::Failed(e) => e.downcast_ref::<E>(),
            Self::Panicked(_) | Self::PoolClosed => None,
        }
    }
}

/// Invokes callables in their declared mode.
///
/// Cheap to clone; clones share the worker pool.
#[derive(Clone)]
pub struct HybridExecutor {
    pool: Arc<WorkerPool>,
}

impl HybridExecutor {
    /// Executor backed by an existing pool
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    /// Executor with a freshly spawned pool
    ///
    /// # Errors
    ///
    /// If a worker thread cannot be spawned.
    pub fn with_config(config: WorkerPoolConfig) -> std::io::Result<Self> {
        Ok(Self::new(Arc::new(WorkerPool::new(config)?)))
    }

    /// The shared blocking pool
    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Run `callable` with `args` and return its value.
    ///
    /// # Errors
    ///
    /// See [`ExecutionError`].
    pub async fn invoke<T>(&self, callable: &Callable<T>, args: Arguments) -> Result<T, ExecutionError>
    where
        T: Send + 'static,
    {
        let started = Instant::now();
        // EX1: Invocation start
        debug!(
            callable = %callable.label,
            mode = %callable.mode(),
            request_id = %args.context().request_id,
            "Invoking callable"
        );

        let result = match &callable.inner {
            Inner::NonBlocking(f) => Self::run_non_blocking(f.as_ref(), args).await,
            Inner::Blocking(f) => self.run_blocking(Arc::clone(f), args).await,
        };

        match &result {
            Ok(_) => {
                // EX2: Invocation complete
                debug!(
                    callable = %callable.label,
                    mode = %callable.mode(),
                    duration_us = started.elapsed().as_micros(),
                    "Callable completed"
                );
            }
            Err(ExecutionError::Panicked(msg)) => {
                // EX3: Panic captured
                error!(
                    callable = %callable.label,
                    mode = %callable.mode(),
                    panic_message = %msg,
                    "Callable panicked"
                );
            }
            Err(e) => {
                // EX4: Invocation failed
                debug!(
                    callable = %callable.label,
                    mode = %callable.mode(),
                    error = %e,
                    duration_us = started.elapsed().as_micros(),
                    "Callable failed"
                );
            }
        }
        result
    }

    async fn run_non_blocking<T>(f: &NonBlockingFn<T>, args: Arguments) -> Result<T, ExecutionError> {
        // Building the future runs user code too
        let fut = catch_unwind(AssertUnwindSafe(|| f(args)))
            .map_err(|p| ExecutionError::Panicked(panic_message(p.as_ref())))?;

        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ExecutionError::Failed(e)),
            Err(p) => Err(ExecutionError::Panicked(panic_message(p.as_ref()))),
        }
    }

    async fn run_blocking<T>(&self, f: Arc<BlockingFn<T>>, args: Arguments) -> Result<T, ExecutionError>
    where
        T: Send + 'static,
    {
        let rx = self
            .pool
            .submit(move || f(args))
            .map_err(|_| ExecutionError::PoolClosed)?;

        match rx.await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(ExecutionError::Failed(e)),
            Ok(Err(p)) => Err(ExecutionError::Panicked(panic_message(p.as_ref()))),
            // Job dropped without running
            Err(_) => Err(ExecutionError::PoolClosed),
        }
    }
}
