//! # switchyard
//!
//! **switchyard** is the request-dispatch core of a web framework: it maps an
//! HTTP method and path to a handler with typed parameters, resolves the
//! handler's declared dependencies concurrently, and invokes the handler
//! whether it was written as blocking or async code.
//!
//! Wire-level HTTP, TLS and middleware belong to the surrounding transport
//! layer. It hands the dispatcher a method, a path, query pairs, headers and
//! a deferred body, and gets back a status, headers and a JSON body.
//!
//! ## Architecture
//!
//! - **[`router`]** - static segment trie plus ordered per-method pattern lists
//! - **[`executor`]** - uniform invocation of blocking and async callables
//! - **[`dependency`]** - dependency graphs validated at registration and
//!   resolved in concurrent waves, with request and process caches
//! - **[`dispatcher`]** - glue: route, resolve, invoke, normalize
//! - **[`worker_pool`]** - fixed pool of OS threads for blocking work
//! - **[`runtime_config`]** / **[`logging`]** - configuration and `tracing` setup
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Transport
//!     participant Dispatcher
//!     participant Router
//!     participant Resolver as DependencyResolver
//!     participant Executor as HybridExecutor
//!     participant Pool as WorkerPool
//!
//!     Transport->>Dispatcher: handle(method, path, query, headers, body)
//!     Dispatcher->>Router: match_route(method, path)
//!     alt no match
//!         Router-->>Dispatcher: NotFound / MethodNotAllowed
//!         Dispatcher-->>Transport: 404 / 405
//!     end
//!     Router-->>Dispatcher: RouteMatch (typed path params)
//!     Dispatcher->>Dispatcher: convert query params
//!     loop each wave
//!         Dispatcher->>Resolver: resolve(plan)
//!         par wave members
//!             Resolver->>Executor: invoke(provider)
//!             Executor->>Pool: submit (blocking only)
//!             Pool-->>Executor: result
//!         end
//!     end
//!     Resolver-->>Dispatcher: dependency values
//!     Dispatcher->>Executor: invoke(handler, arguments)
//!     Executor-->>Dispatcher: Reply
//!     Dispatcher-->>Transport: HandlerResponse (status, headers, body)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use http::Method;
//! use serde_json::json;
//! use switchyard::{Body, Dispatcher, HeaderVec, ParamKind, RouteDefinition, RuntimeConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let mut dispatcher = Dispatcher::new(RuntimeConfig::default())?;
//! dispatcher.register(
//!     Method::GET,
//!     "/users/{id}",
//!     RouteDefinition::blocking(|args| Ok(json!({ "id": args.i64("id")? })))
//!         .param("id", ParamKind::Int),
//! )?;
//!
//! let resp = dispatcher
//!     .handle(Method::GET, "/users/42", Vec::new(), HeaderVec::new(), Body::empty())
//!     .await?;
//! assert_eq!(resp.status, 200);
//! assert_eq!(resp.body, json!({ "id": 42 }));
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! [`RuntimeConfig`] comes from defaults, an optional YAML file and
//! `SWITCHYARD_*` environment variables. Logging is configured separately
//! through [`logging::LogConfig`].

pub mod context;
pub mod dependency;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod ids;
pub mod logging;
pub mod router;
pub mod runtime_config;
pub mod worker_pool;

pub use context::{Arguments, Body, HeaderVec, RequestContext};
pub use dependency::{CacheScope, Dependency, ProcessCache};
pub use dispatcher::{
    DispatchError, Dispatcher, HandlerResponse, RegistrationError, Reply, RouteDefinition,
};
pub use error::HttpError;
pub use executor::{Callable, ExecutionMode, HybridExecutor};
pub use ids::RequestId;
pub use router::{ParamKind, Router};
pub use runtime_config::RuntimeConfig;
