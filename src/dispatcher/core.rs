use anyhow::Context;
use futures::FutureExt;
use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::error::{DispatchError, RegistrationError};
use super::response::{HandlerResponse, Reply};
use crate::context::{Arguments, Body, HeaderVec, RequestContext};
use crate::dependency::{
    Dependency, DependencyGraphError, DependencyResolver, ProcessCache, RequestCache,
    ResolutionPlan,
};
use crate::executor::{Callable, ExecutionMode, HybridExecutor};
use crate::ids::{RequestId, REQUEST_ID_HEADER};
use crate::router::{ParamKind, PathPattern, RegisterError, RouteId, Router, UrlForError};
use crate::runtime_config::RuntimeConfig;
use crate::worker_pool::WorkerPoolSnapshot;

/// A route handler: any callable producing a [`Reply`]
pub type Handler = Callable<Reply>;

/// A declared query parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParam {
    /// Query key
    pub name: Arc<str>,
    /// Target type
    pub kind: ParamKind,
    /// Absence is a 400
    pub required: bool,
    /// Value used when absent
    pub default: Option<Value>,
}

/// Everything needed to register one route.
///
/// ```rust
/// use switchyard::{ParamKind, RouteDefinition};
/// use serde_json::json;
///
/// let def = RouteDefinition::non_blocking(|args| async move {
///     anyhow::Ok(json!({ "id": args.i64("id")?, "limit": args.i64("limit")? }))
/// })
/// .param("id", ParamKind::Int)
/// .query_default("limit", ParamKind::Int, json!(20))
/// .name("user_detail");
/// # let _ = def;
/// ```
#[derive(Debug, Clone)]
pub struct RouteDefinition {
    handler: Handler,
    params: Vec<(String, ParamKind)>,
    query: Vec<QueryParam>,
    dependencies: Vec<Dependency>,
    name: Option<String>,
}

impl RouteDefinition {
    /// Route for an existing handler callable
    #[must_use]
    pub fn new(handler: Handler) -> Self {
        Self {
            handler,
            params: Vec::new(),
            query: Vec::new(),
            dependencies: Vec::new(),
            name: None,
        }
    }

    /// Route with a synchronous handler, run on the blocking worker pool
    pub fn blocking<F, R>(f: F) -> Self
    where
        F: Fn(Arguments) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Into<Reply> + 'static,
    {
        Self::new(Callable::blocking(move |args| f(args).map(Into::into)))
    }

    /// Route with an async handler, awaited on the dispatching task
    pub fn non_blocking<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        Self::new(Callable::non_blocking(move |args| {
            f(args).map(|res| res.map(Into::into))
        }))
    }

    /// Declare the type of a path placeholder (undeclared ones are strings)
    #[must_use]
    pub fn param(mut self, name: &str, kind: ParamKind) -> Self {
        self.params.push((name.to_string(), kind));
        self
    }

    /// Optional query parameter; omitted from the arguments when absent
    #[must_use]
    pub fn query(self, name: &str, kind: ParamKind) -> Self {
        self.push_query(name, kind, false, None)
    }

    /// Query parameter whose absence is a 400
    #[must_use]
    pub fn query_required(self, name: &str, kind: ParamKind) -> Self {
        self.push_query(name, kind, true, None)
    }

    /// Query parameter falling back to `default` when absent
    #[must_use]
    pub fn query_default(self, name: &str, kind: ParamKind, default: Value) -> Self {
        self.push_query(name, kind, false, Some(default))
    }

    /// Attach a dependency; its value is passed to the handler under its name
    #[must_use]
    pub fn dependency(mut self, dep: Dependency) -> Self {
        self.dependencies.push(dep);
        self
    }

    /// Name the route for [`Dispatcher::url_for`]
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Execution mode of the handler
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.handler.mode()
    }

    fn push_query(mut self, name: &str, kind: ParamKind, required: bool, default: Option<Value>) -> Self {
        self.query.push(QueryParam {
            name: Arc::from(name),
            kind,
            required,
            default,
        });
        self
    }
}

/// A registered route's handler, query declarations and dependency plan.
#[derive(Debug)]
pub struct Endpoint {
    handler: Handler,
    query: Vec<QueryParam>,
    plan: ResolutionPlan,
}

impl Endpoint {
    /// The handler callable
    #[must_use]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Declared query parameters
    #[must_use]
    pub fn query_params(&self) -> &[QueryParam] {
        &self.query
    }

    /// Dependency plan computed at registration
    #[must_use]
    pub fn plan(&self) -> &ResolutionPlan {
        &self.plan
    }
}

/// Runs requests through routing, dependency resolution and the handler.
///
/// Build it at startup, register routes and shared dependencies, then share
/// it (e.g. behind an `Arc`) with the transport layer. Registration takes
/// `&mut self`; serving takes `&self` and needs no locks.
pub struct Dispatcher {
    router: Router<Arc<Endpoint>>,
    resolver: DependencyResolver,
    executor: HybridExecutor,
    config: RuntimeConfig,
}

impl Dispatcher {
    /// Validate `config` and start the blocking worker pool
    ///
    /// # Errors
    ///
    /// Invalid configuration or a worker thread that cannot be spawned.
    pub fn new(config: RuntimeConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let executor = HybridExecutor::with_config(config.worker_pool())
            .context("failed to start blocking worker pool")?;
        let router = Router::new().with_slow_match_threshold(config.slow_route_threshold());
        let resolver = DependencyResolver::new(executor.clone());

        info!(
            blocking_workers = config.blocking_workers,
            worker_stack_size = config.worker_stack_size,
            "Dispatcher ready"
        );

        Ok(Self {
            router,
            resolver,
            executor,
            config,
        })
    }

    /// Dispatcher with the default [`RuntimeConfig`] plus environment overrides
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::new`].
    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(RuntimeConfig::from_env())
    }

    /// Use a process-scope cache owned elsewhere (shared between dispatchers,
    /// or kept by a test to inspect)
    #[must_use]
    pub fn with_process_cache(mut self, cache: Arc<ProcessCache>) -> Self {
        self.resolver = self.resolver.with_process_cache(cache);
        self
    }

    /// Register an application-wide dependency routes can reference by name.
    ///
    /// Routes registered earlier do not see it. A route whose dependencies
    /// reference a name that is both one of its parameters and a provided
    /// dependency fails to register with
    /// [`DependencyGraphError::ShadowsParameter`].
    ///
    /// # Errors
    ///
    /// [`DependencyGraphError::Duplicate`] for a name already provided.
    pub fn provide(&mut self, dep: Dependency) -> Result<(), DependencyGraphError> {
        self.resolver.declare_shared(dep)
    }

    /// Register a route.
    ///
    /// The dependency graph is validated here; a route with a cyclic or
    /// otherwise invalid graph is never added.
    ///
    /// # Errors
    ///
    /// See [`RegistrationError`].
    pub fn register(
        &mut self,
        method: Method,
        pattern: &str,
        def: RouteDefinition,
    ) -> Result<RouteId, RegistrationError> {
        let RouteDefinition {
            handler,
            params,
            query,
            dependencies,
            name,
        } = def;

        let parsed = PathPattern::parse(pattern).map_err(RegisterError::from)?;
        let mut names: Vec<Arc<str>> = parsed.params().into_iter().map(|(n, _)| n).collect();
        for q in &query {
            if names.contains(&q.name) {
                return Err(RegistrationError::DuplicateParameter {
                    name: q.name.to_string(),
                });
            }
            names.push(Arc::clone(&q.name));
        }

        if let Some(name) = &name {
            if self.router.route_named(name).is_some() {
                return Err(RegisterError::DuplicateName { name: name.clone() }.into());
            }
        }

        let plan = self.resolver.plan(&dependencies, &names)?;
        let label = name.clone().unwrap_or_else(|| format!("{method} {pattern}"));
        let mode = handler.mode();
        let waves = plan.waves().len();
        let endpoint = Arc::new(Endpoint {
            handler: handler.with_label(&label),
            query,
            plan,
        });

        let declared: Vec<(&str, ParamKind)> =
            params.iter().map(|(n, k)| (n.as_str(), *k)).collect();
        let id = self.router.register(method.clone(), pattern, endpoint, &declared)?;
        if let Some(name) = &name {
            self.router.set_name(id, name)?;
        }

        // D0: Route wired to handler
        info!(
            route_id = id,
            method = %method,
            pattern = %pattern,
            handler = %label,
            mode = %mode,
            dependency_waves = waves,
            "Handler registered"
        );
        Ok(id)
    }

    /// Handle one request.
    ///
    /// * `query` - decoded query pairs in arrival order; the last occurrence
    ///   of a declared name wins
    /// * `headers` - request headers; a valid `x-request-id` is reused
    /// * `body` - deferred body, loaded only if a handler or provider asks
    ///
    /// # Errors
    ///
    /// [`DispatchError`]; its [`status`](DispatchError::status) is fixed per
    /// variant.
    pub async fn handle(
        &self,
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
        headers: HeaderVec,
        body: Body,
    ) -> Result<HandlerResponse, DispatchError> {
        let ctx = Self::context(method, path, query, headers, body);
        self.dispatch(Arc::new(ctx)).await
    }

    /// Like [`Dispatcher::handle`], with errors rendered as responses
    pub async fn handle_to_response(
        &self,
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
        headers: HeaderVec,
        body: Body,
    ) -> HandlerResponse {
        let ctx = Arc::new(Self::context(method, path, query, headers, body));
        let request_id = ctx.request_id;
        match self.dispatch(ctx).await {
            Ok(resp) => resp,
            Err(e) => e.into_response(&request_id),
        }
    }

    /// Handle a request whose context the transport already built
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::handle`].
    pub async fn dispatch(&self, ctx: Arc<RequestContext>) -> Result<HandlerResponse, DispatchError> {
        let span = info_span!(
            "dispatch",
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
        );
        self.dispatch_inner(ctx).instrument(span).await
    }

    fn context(
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
        headers: HeaderVec,
        body: Body,
    ) -> RequestContext {
        let request_id = RequestId::from_header_or_new(
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(REQUEST_ID_HEADER))
                .map(|(_, v)| v.as_str()),
        );
        RequestContext {
            request_id,
            method,
            path: path.to_string(),
            query,
            headers,
            body,
        }
    }

    async fn dispatch_inner(&self, ctx: Arc<RequestContext>) -> Result<HandlerResponse, DispatchError> {
        let started = Instant::now();

        // D1: Routing
        let route_match = match self.router.match_route(&ctx.method, &ctx.path) {
            Ok(m) => m,
            Err(e) => {
                debug!(request_id = %ctx.request_id, error = %e, "Routing failed");
                return Err(e.into());
            }
        };
        let endpoint = Arc::clone(route_match.handler());

        let mut params = route_match.path_params_map();
        bind_query(&endpoint.query, &ctx, &mut params)?;

        // D2: Dependency resolution
        let resolved = if endpoint.plan.is_empty() {
            HashMap::new()
        } else {
            debug!(
                request_id = %ctx.request_id,
                dependencies = endpoint.plan.len(),
                waves = endpoint.plan.waves().len(),
                "Resolving dependencies"
            );
            let cache = RequestCache::new();
            self.resolver
                .resolve(&endpoint.plan, &params, &ctx, &cache)
                .await?
        };

        let mut args = Arguments::with_values(Arc::clone(&ctx), params);
        for (name, value) in resolved {
            args.insert(name, value);
        }

        // D3: Handler execution start
        debug!(
            request_id = %ctx.request_id,
            handler = %endpoint.handler.label(),
            mode = %endpoint.handler.mode(),
            arguments = args.len(),
            "Handler execution start"
        );
        let handler_started = Instant::now();
        let outcome = self.executor.invoke(&endpoint.handler, args).await;
        let handler_elapsed = handler_started.elapsed();

        if handler_elapsed > self.config.slow_handler_threshold() {
            // D4: Slow handler
            warn!(
                request_id = %ctx.request_id,
                handler = %endpoint.handler.label(),
                duration_ms = u64::try_from(handler_elapsed.as_millis()).unwrap_or(u64::MAX),
                threshold_ms = self.config.slow_handler_threshold_ms,
                "Slow handler"
            );
        }

        let mut resp = match outcome {
            Ok(reply) => reply.into_response(),
            Err(e) => {
                let err = DispatchError::from(e);
                if err.status() >= 500 {
                    // D5: Handler failed
                    error!(
                        request_id = %ctx.request_id,
                        handler = %endpoint.handler.label(),
                        status = err.status(),
                        error = %err,
                        "Handler failed"
                    );
                } else {
                    debug!(
                        request_id = %ctx.request_id,
                        handler = %endpoint.handler.label(),
                        status = err.status(),
                        "Handler returned client error"
                    );
                }
                return Err(err);
            }
        };
        resp.set_header(REQUEST_ID_HEADER, ctx.request_id.to_string());

        // D6: Request complete
        info!(
            request_id = %ctx.request_id,
            handler = %endpoint.handler.label(),
            status = resp.status,
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Request complete"
        );
        Ok(resp)
    }

    /// Build a concrete path for a named route
    ///
    /// # Errors
    ///
    /// See [`UrlForError`].
    pub fn url_for(&self, name: &str, params: &[(&str, &str)]) -> Result<String, UrlForError> {
        self.router.url_for(name, params)
    }

    /// The route table
    #[must_use]
    pub fn router(&self) -> &Router<Arc<Endpoint>> {
        &self.router
    }

    /// The dependency resolver
    #[must_use]
    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    /// The hybrid executor
    #[must_use]
    pub fn executor(&self) -> &HybridExecutor {
        &self.executor
    }

    /// Configuration the dispatcher was built with
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Point-in-time blocking pool counters
    #[must_use]
    pub fn worker_pool_metrics(&self) -> WorkerPoolSnapshot {
        self.executor.pool().snapshot()
    }

    /// Stop accepting blocking work and join the worker threads.
    ///
    /// Blocks the calling thread until queued jobs finish.
    pub fn shutdown(&self) {
        self.executor.pool().shutdown();
    }
}

fn bind_query(
    declared: &[QueryParam],
    ctx: &RequestContext,
    params: &mut HashMap<Arc<str>, Value>,
) -> Result<(), DispatchError> {
    for q in declared {
        match ctx.query_param(&q.name) {
            Some(raw) => {
                let value = q.kind.convert(&q.name, raw).inspect_err(|e| {
                    debug!(request_id = %ctx.request_id, error = %e, "Query conversion failed");
                })?;
                params.insert(Arc::clone(&q.name), value);
            }
            None if q.required => {
                return Err(DispatchError::MissingParameter {
                    name: q.name.to_string(),
                })
            }
            None => {
                if let Some(default) = &q.default {
                    params.insert(Arc::clone(&q.name), default.clone());
                }
            }
        }
    }
    Ok(())
}
