//! # Dependency Module
//!
//! Declarative dependencies for handlers: each [`Dependency`] names a
//! provider, the inputs it needs (other dependencies or route parameters)
//! and how long its value may be reused.
//!
//! ## Lifecycle
//!
//! 1. **Registration** - [`ResolutionPlan::build`] validates the declarations
//!    (duplicates, unknown inputs, cycles) and orders them into waves.
//!    Invalid graphs never reach request handling.
//! 2. **Request** - [`DependencyResolver::resolve`] walks the waves. Members
//!    of a wave run concurrently; a wave starts once the previous one has
//!    finished.
//!
//! ## Caching
//!
//! | Scope | Reuse |
//! |-------|-------|
//! | [`CacheScope::None`] | none, invoked for every consumer |
//! | [`CacheScope::Request`] | once per request per provider ([`RequestCache`]) |
//! | [`CacheScope::Process`] | once per process per provider ([`ProcessCache`]) |
//!
//! Cache slots are keyed by provider identity, not by descriptor name: two
//! descriptors built from clones of the same [`Callable`](crate::executor::Callable)
//! share a slot.
//!
//! ## Failures
//!
//! The first provider error aborts resolution with a
//! [`DependencyResolutionError`]. If the provider failed with an
//! [`HttpError`](crate::HttpError) its status is kept, otherwise the
//! request answers 500.

mod cache;
mod core;
mod graph;
mod resolver;

pub use cache::{ProcessCache, RequestCache};
pub use core::{
    CacheScope, CyclicDependencyError, Dependency, DependencyGraphError,
    DependencyResolutionError,
};
pub use graph::{Input, ResolutionPlan};
pub use resolver::DependencyResolver;
