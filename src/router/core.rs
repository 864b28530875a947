//! Router core module - hot path for request routing.
//!
//! Static routes are resolved through the segment trie; every other route is
//! tried from a per-method list in registration order.

use http::Method;
use regex::{Captures, Regex};
use serde_json::Value;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::params::{ParamConversionError, ParamKind};
use super::pattern::{decoded_segments, normalize_path, PathPattern, PatternError};
use super::trie::TrieNode;

/// Maximum number of path parameters before heap allocation.
/// Most REST APIs have ≤4 path params (e.g., /users/{id}/posts/{postId}).
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated storage for converted path parameters.
///
/// Param names use `Arc<str>` because they come from the route table built at
/// startup; cloning one is an atomic increment rather than a string copy.
pub type ParamVec = SmallVec<[(Arc<str>, Value); MAX_INLINE_PARAMS]>;

/// Registration order of a route; doubles as its stable identifier.
pub type RouteId = usize;

/// A registered route.
///
/// Created by [`Router::register`] and immutable afterwards.
pub struct Route<H> {
    /// Registration order (0-based)
    pub id: RouteId,
    /// HTTP method
    pub method: Method,
    /// Parsed pattern, including the raw text and segment descriptors
    pub pattern: PathPattern,
    /// Declared parameter types in pattern order
    pub params: Vec<(Arc<str>, ParamKind)>,
    /// Handler reference supplied at registration
    pub handler: H,
    /// `true` when the pattern has no placeholders
    pub is_static: bool,
}

impl<H> Route<H> {
    /// Declared kind of a path parameter
    #[must_use]
    pub fn param_kind(&self, name: &str) -> Option<ParamKind> {
        self.params
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, k)| *k)
    }
}

impl<H> fmt::Debug for Route<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .field("params", &self.params)
            .field("is_static", &self.is_static)
            .finish_non_exhaustive()
    }
}

/// Result of successfully matching a request path to a route
pub struct RouteMatch<H> {
    /// The matched route
    pub route: Arc<Route<H>>,
    /// Path parameters converted to their declared kinds
    pub path_params: ParamVec,
}

impl<H> Clone for RouteMatch<H> {
    fn clone(&self) -> Self {
        Self {
            route: Arc::clone(&self.route),
            path_params: self.path_params.clone(),
        }
    }
}

impl<H> fmt::Debug for RouteMatch<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("route", &self.route)
            .field("path_params", &self.path_params)
            .finish()
    }
}

impl<H> RouteMatch<H> {
    /// Handler of the matched route
    #[must_use]
    pub fn handler(&self) -> &H {
        &self.route.handler
    }

    /// Get a converted path parameter by name
    ///
    /// Uses "last write wins" semantics, although patterns reject duplicate
    /// placeholder names so there is at most one entry per name.
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&Value> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v)
    }

    /// Convert path_params to a HashMap
    /// Note: This allocates - use get_path_param() in hot paths instead
    #[must_use]
    pub fn path_params_map(&self) -> HashMap<Arc<str>, Value> {
        self.path_params.iter().cloned().collect()
    }
}

/// Routing failure returned by [`Router::match_route`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteError {
    /// No method has a route for this path
    #[error("no route matches {method} {path}")]
    NotFound {
        /// Requested method
        method: Method,
        /// Requested path
        path: String,
    },
    /// The path exists, but only under other methods
    #[error("{method} not allowed for {path}")]
    MethodNotAllowed {
        /// Requested method
        method: Method,
        /// Requested path
        path: String,
        /// Methods that would have matched, sorted by name
        allowed: Vec<Method>,
    },
    /// A captured value failed typed conversion
    #[error(transparent)]
    ParamConversion(#[from] ParamConversionError),
}

/// Duplicate `(method, static path)` registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("route {method} {path} is already registered (route #{existing})")]
pub struct ConflictError {
    /// Method of the rejected registration
    pub method: Method,
    /// Normalized static path
    pub path: String,
    /// Route already occupying the slot
    pub existing: RouteId,
}

/// Errors raised while building the route table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    /// Identical static route already registered
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    /// Pattern failed to parse
    #[error(transparent)]
    Pattern(#[from] PatternError),
    /// A declared parameter type names no placeholder
    #[error("parameter `{name}` is not a placeholder of `{pattern}`")]
    UnknownParam {
        /// Pattern text
        pattern: String,
        /// Declared name
        name: String,
    },
    /// Route name already in use
    #[error("route name `{name}` is already taken")]
    DuplicateName {
        /// Rejected name
        name: String,
    },
    /// No route with this id
    #[error("no route with id {0}")]
    UnknownRoute(RouteId),
}

/// Reverse-routing failure from [`Router::url_for`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlForError {
    /// No route carries this name
    #[error("no route named `{0}`")]
    UnknownName(String),
    /// A placeholder had no value
    #[error("route `{route}` needs parameter `{param}`")]
    MissingParam {
        /// Route name
        route: String,
        /// Placeholder name
        param: String,
    },
}

struct DynamicEntry<H> {
    regex: Regex,
    route: Arc<Route<H>>,
}

/// Route table mapping `(method, path)` to a handler and typed parameters.
///
/// Registration is expected to finish before the router serves requests;
/// lookups take `&self` and need no locking.
///
/// # Performance
///
/// - Static routes: O(k) in the number of path segments, independent of table size
/// - Dynamic routes: linear in the number of dynamic routes for the method
pub struct Router<H> {
    trie: TrieNode<Route<H>>,
    dynamic: HashMap<Method, Vec<DynamicEntry<H>>>,
    routes: Vec<Arc<Route<H>>>,
    names: HashMap<Arc<str>, RouteId>,
    slow_match_threshold: Duration,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Router<H> {
    /// Create an empty router
    #[must_use]
    pub fn new() -> Self {
        Self {
            trie: TrieNode::new(),
            dynamic: HashMap::new(),
            routes: Vec::new(),
            names: HashMap::new(),
            slow_match_threshold: Duration::from_millis(1),
        }
    }

    /// Matches taking longer than `threshold` are logged at warn level
    #[must_use]
    pub fn with_slow_match_threshold(mut self, threshold: Duration) -> Self {
        self.slow_match_threshold = threshold;
        self
    }

    /// Register a route.
    ///
    /// Static patterns go into the trie; any pattern with a placeholder is
    /// appended to the method's dynamic list, after every route registered
    /// before it.
    ///
    /// # Arguments
    ///
    /// * `method` - HTTP method
    /// * `pattern` - Path pattern (e.g., `/users/{id}` or `/users/{id:int}`)
    /// * `handler` - Handler reference returned on match
    /// * `param_types` - Declared kinds; these override inline `{name:kind}`
    ///   annotations, and undeclared placeholders default to `str`
    ///
    /// # Errors
    ///
    /// * [`RegisterError::Pattern`] - malformed pattern
    /// * [`RegisterError::UnknownParam`] - a declared name is not a placeholder
    /// * [`RegisterError::Conflict`] - identical `(method, static path)` exists
    pub fn register(
        &mut self,
        method: Method,
        pattern: &str,
        handler: H,
        param_types: &[(&str, ParamKind)],
    ) -> Result<RouteId, RegisterError> {
        let parsed = PathPattern::parse(pattern)?;
        let placeholders = parsed.params();

        if let Some((name, _)) = param_types
            .iter()
            .find(|(name, _)| !placeholders.iter().any(|(p, _)| p.as_ref() == *name))
        {
            return Err(RegisterError::UnknownParam {
                pattern: pattern.to_string(),
                name: (*name).to_string(),
            });
        }

        let params = placeholders
            .into_iter()
            .map(|(name, inline)| {
                let declared = param_types
                    .iter()
                    .rfind(|(n, _)| *n == name.as_ref())
                    .map(|(_, k)| *k);
                let kind = declared.or(inline).unwrap_or_default();
                (name, kind)
            })
            .collect();

        let id = self.routes.len();
        let is_static = parsed.is_static();

        if is_static {
            let route = Arc::new(Route {
                id,
                method: method.clone(),
                pattern: parsed,
                params,
                handler,
                is_static,
            });
            let segments: Vec<&str> = route.pattern.literal_segments().collect();
            self.trie
                .insert(segments, method.clone(), Arc::clone(&route))
                .map_err(|existing| ConflictError {
                    method: method.clone(),
                    path: normalize_path(pattern),
                    existing: existing.id,
                })?;
            self.routes.push(route);
        } else {
            let regex = parsed.compile()?;
            let route = Arc::new(Route {
                id,
                method: method.clone(),
                pattern: parsed,
                params,
                handler,
                is_static,
            });
            self.dynamic.entry(method.clone()).or_default().push(DynamicEntry {
                regex,
                route: Arc::clone(&route),
            });
            self.routes.push(route);
        }

        // RT5: Route registered
        debug!(
            route_id = id,
            method = %method,
            pattern = %pattern,
            is_static,
            "Route registered"
        );

        Ok(id)
    }

    /// Attach a unique name to a route for [`Router::url_for`].
    ///
    /// # Errors
    ///
    /// [`RegisterError::DuplicateName`] if another route already uses the
    /// name, [`RegisterError::UnknownRoute`] if `id` was never issued.
    pub fn set_name(&mut self, id: RouteId, name: &str) -> Result<(), RegisterError> {
        if id >= self.routes.len() {
            return Err(RegisterError::UnknownRoute(id));
        }
        match self.names.get(name) {
            Some(existing) if *existing == id => Ok(()),
            Some(_) => Err(RegisterError::DuplicateName {
                name: name.to_string(),
            }),
            None => {
                self.names.insert(Arc::from(name), id);
                Ok(())
            }
        }
    }

    /// Name given to a route, if any
    #[must_use]
    pub fn name_of(&self, id: RouteId) -> Option<&str> {
        self.names
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.as_ref())
    }

    /// Route carrying `name`
    #[must_use]
    pub fn route_named(&self, name: &str) -> Option<&Arc<Route<H>>> {
        self.names.get(name).and_then(|id| self.routes.get(*id))
    }

    /// Build a concrete path for a named route.
    ///
    /// Values are percent-encoded; extra values are ignored.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// router.set_name(id, "user_detail")?;
    /// assert_eq!(router.url_for("user_detail", &[("id", "42")])?, "/users/42");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`UrlForError`] for an unknown name or a missing placeholder.
    pub fn url_for(&self, name: &str, params: &[(&str, &str)]) -> Result<String, UrlForError> {
        let route = self
            .names
            .get(name)
            .and_then(|id| self.routes.get(*id))
            .ok_or_else(|| UrlForError::UnknownName(name.to_string()))?;

        route
            .pattern
            .render(|p| {
                params
                    .iter()
                    .rfind(|(k, _)| *k == p)
                    .map(|(_, v)| (*v).to_string())
            })
            .map_err(|param| UrlForError::MissingParam {
                route: name.to_string(),
                param: param.to_string(),
            })
    }

    /// Match a request against the route table.
    ///
    /// 1. Walk the trie; a static terminal for `method` wins immediately.
    /// 2. Otherwise try the method's dynamic routes in registration order.
    ///    The first structural match wins, with no specificity scoring.
    /// 3. Otherwise report [`RouteError::MethodNotAllowed`] if the path
    ///    matches under any other method, else [`RouteError::NotFound`].
    ///
    /// # Errors
    ///
    /// [`RouteError::ParamConversion`] when the first matching dynamic route
    /// captures a value that fails its declared kind; later routes are not
    /// tried.
    pub fn match_route(&self, method: &Method, path: &str) -> Result<RouteMatch<H>, RouteError> {
        // RT1: Route match attempt
        debug!(method = %method, path = %path, "Route match attempt");

        let match_start = Instant::now();
        let normalized = normalize_path(path);
        let segments = decoded_segments(&normalized);
        let terminal = self.trie.lookup(segments.iter().map(AsRef::as_ref));

        if let Some(route) = terminal.and_then(|routes| routes.get(method)) {
            let matched = RouteMatch {
                route: Arc::clone(route),
                path_params: ParamVec::new(),
            };
            self.log_match(&matched, path, match_start.elapsed(), "trie");
            return Ok(matched);
        }

        if let Some(list) = self.dynamic.get(method) {
            for entry in list {
                if let Some(caps) = entry.regex.captures(&normalized) {
                    let path_params = convert_captures(&entry.route, &caps).map_err(|e| {
                        // RT2: Parameter conversion failed
                        warn!(
                            method = %method,
                            path = %path,
                            route_pattern = %entry.route.pattern.as_str(),
                            param = %e.name,
                            value = %e.value,
                            expected = %e.expected,
                            "Path parameter conversion failed"
                        );
                        RouteError::from(e)
                    })?;
                    let matched = RouteMatch {
                        route: Arc::clone(&entry.route),
                        path_params,
                    };
                    self.log_match(&matched, path, match_start.elapsed(), "pattern");
                    return Ok(matched);
                }
            }
        }

        let allowed = self.allowed_methods(method, &normalized, terminal);
        let duration = match_start.elapsed();

        if allowed.is_empty() {
            // RT4: No route found (404)
            warn!(
                method = %method,
                path = %path,
                duration_us = duration.as_micros(),
                "No route matched"
            );
            Err(RouteError::NotFound {
                method: method.clone(),
                path: path.to_string(),
            })
        } else {
            // RT6: Path known under other methods (405)
            info!(
                method = %method,
                path = %path,
                allowed = ?allowed,
                duration_us = duration.as_micros(),
                "Method not allowed"
            );
            Err(RouteError::MethodNotAllowed {
                method: method.clone(),
                path: path.to_string(),
                allowed,
            })
        }
    }

    fn allowed_methods(
        &self,
        method: &Method,
        normalized: &str,
        terminal: Option<&HashMap<Method, Arc<Route<H>>>>,
    ) -> Vec<Method> {
        let mut allowed: Vec<Method> = terminal
            .map(|routes| routes.keys().cloned().collect())
            .unwrap_or_default();

        for (other, list) in &self.dynamic {
            if other == method || allowed.contains(other) {
                continue;
            }
            if list.iter().any(|e| e.regex.is_match(normalized)) {
                allowed.push(other.clone());
            }
        }

        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        allowed
    }

    fn log_match(&self, matched: &RouteMatch<H>, path: &str, duration: Duration, source: &str) {
        let route = &matched.route;
        // RT3: Route matched
        if duration > self.slow_match_threshold {
            warn!(
                method = %route.method,
                path = %path,
                route_id = route.id,
                route_pattern = %route.pattern.as_str(),
                path_params = ?matched.path_params,
                duration_us = duration.as_micros(),
                source,
                "Slow route matching detected"
            );
        } else {
            info!(
                method = %route.method,
                path = %path,
                route_id = route.id,
                route_pattern = %route.pattern.as_str(),
                path_params = ?matched.path_params,
                duration_us = duration.as_micros(),
                source,
                "Route matched"
            );
        }
    }

    /// All routes in registration order
    #[must_use]
    pub fn routes(&self) -> &[Arc<Route<H>>] {
        &self.routes
    }

    /// Route by id
    #[must_use]
    pub fn route(&self, id: RouteId) -> Option<&Arc<Route<H>>> {
        self.routes.get(id)
    }

    /// Number of registered routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// `true` when nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Number of routes held in the static trie
    #[must_use]
    pub fn static_len(&self) -> usize {
        self.routes.iter().filter(|r| r.is_static).count()
    }

    /// Number of routes held in the dynamic lists
    #[must_use]
    pub fn dynamic_len(&self) -> usize {
        self.dynamic.values().map(Vec::len).sum()
    }

    /// Registered path patterns in registration order
    ///
    /// # Returns
    ///
    /// A vector of path patterns (e.g., `["/api/users", "/api/posts/{id}"]`)
    #[must_use]
    pub fn path_patterns(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.pattern.as_str()).collect()
    }

    /// Print all registered routes to stdout
    ///
    /// Useful for debugging and verifying that routes are loaded correctly.
    pub fn dump_routes(&self) {
        println!(
            "[routes] count={} static={} dynamic={} trie_nodes={}",
            self.routes.len(),
            self.static_len(),
            self.dynamic_len(),
            self.trie.node_count()
        );
        for route in &self.routes {
            let name = self.name_of(route.id).unwrap_or("-");
            println!(
                "[route] #{} {} {} name={} static={}",
                route.id,
                route.method,
                route.pattern.as_str(),
                name,
                route.is_static
            );
        }
    }
}

fn convert_captures<H>(route: &Route<H>, caps: &Captures<'_>) -> Result<ParamVec, ParamConversionError> {
    let mut out = ParamVec::new();
    for (name, kind) in &route.params {
        let raw = caps.name(name).map_or("", |m| m.as_str());
        let decoded = urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw));
        out.push((Arc::clone(name), kind.convert(name, &decoded)?));
    }
    Ok(out)
}
