//! Concurrent, wave-by-wave evaluation of a [`ResolutionPlan`].

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::AbortHandle;
use tracing::{debug, warn, Instrument};

use super::cache::{ProcessCache, RequestCache};
use super::core::{CacheScope, Dependency, DependencyGraphError, DependencyResolutionError};
use super::graph::{Input, ResolutionPlan};
use crate::context::{Arguments, RequestContext};
use crate::executor::{ExecutionError, HybridExecutor};

/// Builds plans at registration and evaluates them per request.
///
/// Members of a wave run as separate tokio tasks, so a wave costs roughly
/// its slowest member rather than the sum. [`DependencyResolver::resolve`]
/// must therefore be awaited inside a tokio runtime.
#[derive(Clone)]
pub struct DependencyResolver {
    executor: HybridExecutor,
    process_cache: Arc<ProcessCache>,
    shared: Vec<Dependency>,
}

impl DependencyResolver {
    /// Resolver with its own empty process cache
    #[must_use]
    pub fn new(executor: HybridExecutor) -> Self {
        Self {
            executor,
            process_cache: Arc::new(ProcessCache::new()),
            shared: Vec::new(),
        }
    }

    /// Use an externally owned process cache
    #[must_use]
    pub fn with_process_cache(mut self, cache: Arc<ProcessCache>) -> Self {
        self.process_cache = cache;
        self
    }

    /// The process-scope cache
    #[must_use]
    pub fn process_cache(&self) -> &Arc<ProcessCache> {
        &self.process_cache
    }

    /// Register an application-wide dependency any route may reference by name.
    ///
    /// Must be called before the routes that use it are planned.
    ///
    /// # Errors
    ///
    /// [`DependencyGraphError::Duplicate`] if the name is already shared.
    pub fn declare_shared(&mut self, dep: Dependency) -> Result<(), DependencyGraphError> {
        if self.shared.iter().any(|d| d.name() == dep.name()) {
            return Err(DependencyGraphError::Duplicate {
                name: dep.name().to_string(),
            });
        }
        debug!(
            dependency = %dep.name(),
            mode = %dep.mode(),
            cache = ?dep.cache_scope(),
            "Shared dependency declared"
        );
        self.shared.push(dep);
        Ok(())
    }

    /// Shared descriptors in declaration order
    #[must_use]
    pub fn shared(&self) -> &[Dependency] {
        &self.shared
    }

    /// Validate and order a route's dependencies.
    ///
    /// # Errors
    ///
    /// See [`ResolutionPlan::build`].
    pub fn plan(
        &self,
        declared: &[Dependency],
        params: &[Arc<str>],
    ) -> Result<ResolutionPlan, DependencyGraphError> {
        ResolutionPlan::build(declared, &self.shared, params)
    }

    /// Evaluate `plan` for one request.
    ///
    /// Returns every node's value by name. The first provider failure aborts
    /// the resolution; siblings still running in the same wave are left to
    /// finish in the background and their results are dropped.
    ///
    /// Dropping the returned future (the caller timed out or went away)
    /// aborts the wave's tasks instead. Non-blocking providers stop at their
    /// next await point; a blocking provider already on the pool still runs
    /// to completion.
    ///
    /// # Errors
    ///
    /// [`DependencyResolutionError`] naming the failing descriptor.
    pub async fn resolve(
        &self,
        plan: &ResolutionPlan,
        params: &HashMap<Arc<str>, Value>,
        ctx: &Arc<RequestContext>,
        cache: &RequestCache,
    ) -> Result<HashMap<Arc<str>, Value>, DependencyResolutionError> {
        let started = Instant::now();
        let mut resolved: Vec<Option<Value>> = vec![None; plan.len()];

        for (wave_idx, wave) in plan.waves().iter().enumerate() {
            // DR1: Wave start
            debug!(
                request_id = %ctx.request_id,
                wave = wave_idx,
                size = wave.len(),
                "Resolving dependency wave"
            );

            if let [idx] = wave.as_slice() {
                let args = bind_inputs(plan, *idx, &resolved, params, ctx);
                let node = &plan.nodes()[*idx];
                let value = resolve_one(&self.executor, &self.process_cache, cache, node, args)
                    .await
                    .map_err(|e| failure(node, e, ctx))?;
                resolved[*idx] = Some(value);
                continue;
            }

            let mut tasks = FuturesUnordered::new();
            let mut guard = WaveGuard::with_capacity(wave.len());
            for &idx in wave {
                let args = bind_inputs(plan, idx, &resolved, params, ctx);
                let node = plan.nodes()[idx].clone();
                let executor = self.executor.clone();
                let process = Arc::clone(&self.process_cache);
                let cache = cache.clone();
                let task = tokio::spawn(
                    async move { resolve_one(&executor, &process, &cache, &node, args).await }
                        .in_current_span(),
                );
                guard.track(task.abort_handle());
                tasks.push(task.map(move |joined| (idx, joined)));
            }

            while let Some((idx, joined)) = tasks.next().await {
                let node = &plan.nodes()[idx];
                let outcome = joined.unwrap_or_else(|e| Err(ExecutionError::Panicked(e.to_string())));
                match outcome {
                    Ok(value) => resolved[idx] = Some(value),
                    Err(e) => {
                        // Siblings keep running; their results are dropped with `tasks`
                        guard.detach();
                        return Err(failure(node, e, ctx));
                    }
                }
            }
        }

        let values: HashMap<Arc<str>, Value> = plan
            .nodes()
            .iter()
            .zip(resolved)
            .filter_map(|(node, value)| value.map(|v| (Arc::clone(node.name()), v)))
            .collect();

        // DR4: All dependencies resolved
        debug!(
            request_id = %ctx.request_id,
            dependencies = values.len(),
            waves = plan.waves().len(),
            duration_us = started.elapsed().as_micros(),
            "Dependencies resolved"
        );
        Ok(values)
    }
}

/// Aborts a wave's spawned tasks when dropped, unless detached first.
struct WaveGuard {
    handles: Vec<AbortHandle>,
}

impl WaveGuard {
    fn with_capacity(n: usize) -> Self {
        Self {
            handles: Vec::with_capacity(n),
        }
    }

    fn track(&mut self, handle: AbortHandle) {
        self.handles.push(handle);
    }

    fn detach(&mut self) {
        self.handles.clear();
    }
}

impl Drop for WaveGuard {
    fn drop(&mut self) {
        let running = self.handles.iter().filter(|h| !h.is_finished()).count();
        if running == 0 {
            return;
        }
        // DR5: Resolution cancelled mid-wave
        debug!(tasks = running, "Aborting in-flight dependency tasks");
        for handle in &self.handles {
            handle.abort();
        }
    }
}

fn bind_inputs(
    plan: &ResolutionPlan,
    idx: usize,
    resolved: &[Option<Value>],
    params: &HashMap<Arc<str>, Value>,
    ctx: &Arc<RequestContext>,
) -> Arguments {
    let mut args = Arguments::new(Arc::clone(ctx));
    for (name, source) in plan.inputs(idx) {
        let value = match source {
            Input::Dependency(dep) => resolved.get(*dep).cloned().flatten(),
            // Absent optional query parameters stay absent
            Input::Param(param) => params.get(param).cloned(),
        };
        if let Some(value) = value {
            args.insert(Arc::clone(name), value);
        }
    }
    args
}

async fn resolve_one(
    executor: &HybridExecutor,
    process: &ProcessCache,
    cache: &RequestCache,
    node: &Dependency,
    args: Arguments,
) -> Result<Value, ExecutionError> {
    let id = node.provider_id();
    match node.cache_scope() {
        CacheScope::None => executor.invoke(node.provider(), args).await,
        CacheScope::Request => {
            let cell = cache.cell(id);
            cell.get_or_try_init(|| executor.invoke(node.provider(), args))
                .await
                .cloned()
        }
        CacheScope::Process => {
            if let Some(hit) = process.get(id) {
                // DR2: Process cache hit
                debug!(dependency = %node.name(), "Process cache hit");
                return Ok(hit);
            }
            // Single flight within the request, check-then-set across requests
            let cell = cache.cell(id);
            cell.get_or_try_init(|| async {
                let value = executor.invoke(node.provider(), args).await?;
                Ok::<_, ExecutionError>(process.insert_if_absent(id, value))
            })
            .await
            .cloned()
        }
    }
}

fn failure(node: &Dependency, source: ExecutionError, ctx: &RequestContext) -> DependencyResolutionError {
    // DR3: Provider failed, resolution aborted
    warn!(
        request_id = %ctx.request_id,
        dependency = %node.name(),
        mode = %node.mode(),
        error = %source,
        "Dependency resolution failed"
    );
    DependencyResolutionError {
        dependency: Arc::clone(node.name()),
        source,
    }
}
