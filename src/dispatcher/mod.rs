//! # Dispatcher Module
//!
//! The dispatcher runs one request through the three engines: routing,
//! dependency resolution and handler invocation, then normalizes the result.
//!
//! ## Request Flow
//!
//! 1. [`Router::match_route`](crate::router::Router::match_route) finds the
//!    endpoint and converts path parameters; 404/405/400 return immediately
//! 2. Declared query parameters are converted (last occurrence wins),
//!    defaulted, or rejected when required and absent
//! 3. The endpoint's [`ResolutionPlan`](crate::dependency::ResolutionPlan)
//!    is evaluated wave by wave
//! 4. Parameters and dependency values are merged into one
//!    [`Arguments`](crate::context::Arguments) set and the handler is invoked
//!    through the [`HybridExecutor`](crate::executor::HybridExecutor)
//! 5. The handler's [`Reply`] is normalized into a [`HandlerResponse`]
//!
//! The order never changes within a request: the handler's arguments must
//! exist before it runs.
//!
//! ## Handler Registration
//!
//! ```rust
//! use http::Method;
//! use serde_json::json;
//! use switchyard::{Dependency, Dispatcher, ParamKind, RouteDefinition, RuntimeConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut dispatcher = Dispatcher::new(RuntimeConfig::default())?;
//!
//! dispatcher.register(
//!     Method::GET,
//!     "/pets/{id}",
//!     RouteDefinition::blocking(|args| Ok(json!({ "id": args.i64("id")? })))
//!         .param("id", ParamKind::Int),
//! )?;
//!
//! dispatcher.register(
//!     Method::GET,
//!     "/owners/{id:int}",
//!     RouteDefinition::non_blocking(|args| async move {
//!         anyhow::Ok((json!({ "owner": args.require("owner")? }), 200u16))
//!     })
//!     .dependency(
//!         Dependency::blocking("owner", |args| Ok(json!({ "id": args.i64("id")? })))
//!             .input("id"),
//!     ),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every failure is a typed [`DispatchError`] with a fixed status:
//!
//! | Error | Status |
//! |-------|--------|
//! | `NotFound` | 404 |
//! | `MethodNotAllowed` | 405 (with `allow` header) |
//! | `ParamConversion`, `MissingParameter` | 400 |
//! | `Dependency` | provider's `HttpError` status, else 500 |
//! | `Http` | the handler's `HttpError` status |
//! | `Handler`, `Panicked` | 500 |
//! | `Unavailable` | 503 |
//!
//! [`Dispatcher::handle_to_response`] renders errors into JSON responses
//! carrying the request id, for transports that want a single code path.

mod core;
mod error;
mod response;

pub use core::{Dispatcher, Endpoint, Handler, QueryParam, RouteDefinition};
pub use error::{DispatchError, RegistrationError};
pub use response::{HandlerResponse, Reply};
