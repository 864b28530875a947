use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::context::Arguments;
use crate::error::HttpError;
use crate::executor::{Callable, CallableId, ExecutionError, ExecutionMode};

/// Lifetime over which a resolved value is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CacheScope {
    /// Invoke the provider every time it is needed
    #[default]
    None,
    /// At most once per request, shared by every descriptor using the same provider
    Request,
    /// At most once per process (modulo a benign race on first use)
    Process,
}

/// Declarative description of one dependency.
///
/// `inputs` name other dependencies or route parameters (path or query);
/// their values are passed to the provider as [`Arguments`].
///
/// ```rust
/// use switchyard::dependency::{CacheScope, Dependency};
/// use serde_json::json;
///
/// let db = Dependency::blocking("db", |_| Ok(json!("pool-1"))).cache(CacheScope::Process);
/// let user = Dependency::non_blocking("user", |args| async move {
///     let id = args.i64("id")?;
///     anyhow::Ok(json!({ "id": id, "db": args.str("db")? }))
/// })
/// .inputs(["db", "id"]);
/// assert_eq!(user.input_names().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct Dependency {
    name: Arc<str>,
    provider: Callable<Value>,
    inputs: Vec<Arc<str>>,
    cache: CacheScope,
}

impl Dependency {
    /// Descriptor for an existing callable.
    ///
    /// Cloning a callable and using it for two descriptors makes them share
    /// one cache slot.
    pub fn new(name: impl Into<Arc<str>>, provider: Callable<Value>) -> Self {
        Self {
            name: name.into(),
            provider,
            inputs: Vec::new(),
            cache: CacheScope::None,
        }
    }

    /// Descriptor backed by a synchronous provider run on the worker pool
    pub fn blocking<F>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(Arguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let provider = Callable::blocking(f).with_label(&name);
        Self::new(name, provider)
    }

    /// Descriptor backed by an async provider
    pub fn non_blocking<F, Fut>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let name = name.into();
        let provider = Callable::non_blocking(f).with_label(&name);
        Self::new(name, provider)
    }

    /// Add one input
    #[must_use]
    pub fn input(mut self, name: impl Into<Arc<str>>) -> Self {
        self.inputs.push(name.into());
        self
    }

    /// Add several inputs
    #[must_use]
    pub fn inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.inputs.extend(names.into_iter().map(Into::into));
        self
    }

    /// Set the cache scope
    #[must_use]
    pub fn cache(mut self, scope: CacheScope) -> Self {
        self.cache = scope;
        self
    }

    /// Descriptor name (the argument name its value is bound to)
    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// The provider
    #[must_use]
    pub fn provider(&self) -> &Callable<Value> {
        &self.provider
    }

    /// Provider identity, used as the cache key
    #[must_use]
    pub fn provider_id(&self) -> CallableId {
        self.provider.identity()
    }

    /// Execution mode of the provider
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.provider.mode()
    }

    /// Declared inputs in order
    #[must_use]
    pub fn input_names(&self) -> &[Arc<str>] {
        &self.inputs
    }

    /// Cache scope
    #[must_use]
    pub fn cache_scope(&self) -> CacheScope {
        self.cache
    }
}

/// A cycle among dependency declarations.
///
/// `cycle` lists the names along the cycle, starting and ending with the
/// same name (`a -> b -> a`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle: {}", .cycle.join(" -> "))]
pub struct CyclicDependencyError {
    /// Names along the cycle
    pub cycle: Vec<String>,
}

/// Invalid dependency declarations, reported at registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyGraphError {
    /// Declarations form a cycle
    #[error(transparent)]
    Cyclic(#[from] CyclicDependencyError),
    /// Two descriptors with the same name
    #[error("dependency `{name}` is declared twice")]
    Duplicate {
        /// Repeated name
        name: String,
    },
    /// An input is neither a dependency nor a route parameter
    #[error("dependency `{dependency}` needs `{input}`, which is neither a dependency nor a parameter")]
    UnknownInput {
        /// Descriptor declaring the input
        dependency: String,
        /// Unresolvable input
        input: String,
    },
    /// A descriptor has the same name as a route parameter
    #[error("dependency `{name}` shadows a route parameter")]
    ShadowsParameter {
        /// Clashing name
        name: String,
    },
}

/// A provider failed while resolving a request's dependencies.
#[derive(Debug, Error)]
#[error("dependency `{dependency}` failed: {source}")]
pub struct DependencyResolutionError {
    /// Name of the failing descriptor
    pub dependency: Arc<str>,
    /// What the provider did
    pub source: ExecutionError,
}

impl DependencyResolutionError {
    /// Status to answer with: the provider's [`HttpError`] status, 503 when
    /// the worker pool is gone, else 500
    #[must_use]
    pub fn status(&self) -> u16 {
        match &self.source {
            ExecutionError::PoolClosed => 503,
            _ => self.http_error().map_or(500, |e| e.status),
        }
    }

    /// The provider's [`HttpError`], if it failed with one
    #[must_use]
    pub fn http_error(&self) -> Option<&HttpError> {
        self.source.downcast_ref::<HttpError>()
    }
}
