//! # Router Module
//!
//! Maps `(method, path)` to a registered handler reference and a list of
//! typed path parameters. The router knows nothing about executors or
//! dependencies; it is generic over the handler type `H`.
//!
//! ## Architecture
//!
//! Two structures back the route table:
//!
//! 1. **Static trie**: fully literal patterns (`/api/items`) are stored in a
//!    segment trie. Matching walks one edge per path segment, so the cost is
//!    O(segments) however many routes exist.
//!
//! 2. **Dynamic lists**: patterns with placeholders (`/users/{id:int}`,
//!    `/files/{stem}.{ext}`) are compiled to anchored regexes and kept in one
//!    ordered list per HTTP method.
//!
//! ## Matching policy
//!
//! - A static terminal for the requested method always wins.
//! - Otherwise the method's dynamic list is tried in registration order and
//!   the **first structural match wins**. There is no "most specific" scoring;
//!   register narrower patterns first.
//! - If nothing matches for the requested method but the path matches under
//!   another method, the result is `405 Method Not Allowed`; otherwise
//!   `404 Not Found`.
//!
//! Captured values are percent-decoded and converted to their declared
//! [`ParamKind`]. A failed conversion is a [`ParamConversionError`] naming the
//! parameter and value.
//!
//! ## Example
//!
//! ```rust
//! use switchyard::router::{ParamKind, Router};
//! use http::Method;
//! use serde_json::json;
//!
//! let mut router = Router::new();
//! router.register(Method::GET, "/users/{id}", "get_user", &[("id", ParamKind::Int)]).unwrap();
//!
//! let m = router.match_route(&Method::GET, "/users/42").unwrap();
//! assert_eq!(*m.handler(), "get_user");
//! assert_eq!(m.get_path_param("id"), Some(&json!(42)));
//!
//! assert!(router.match_route(&Method::GET, "/users/abc").is_err());
//! ```

mod core;
mod params;
mod pattern;
mod trie;
#[cfg(test)]
mod tests;

pub use core::{
    ConflictError, ParamVec, RegisterError, Route, RouteError, RouteId, RouteMatch, Router,
    UrlForError, MAX_INLINE_PARAMS,
};
pub use params::{ParamConversionError, ParamKind};
pub use pattern::{decoded_segments, normalize_path, split_path, PathPattern, PatternError, Segment, SegmentPart};
