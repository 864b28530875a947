//! Per-request context and handler arguments.
//!
//! [`RequestContext`] is what the transport layer hands the dispatcher:
//! method, path, query multi-map, headers and a deferred [`Body`]. It is
//! shared (`Arc`) with every provider and the handler of one request.
//!
//! [`Arguments`] is the named value set a callable receives: converted
//! path/query parameters merged with resolved dependency values.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use http::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use smallvec::SmallVec;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::OnceCell;

use crate::ids::RequestId;
use crate::worker_pool::panic_message;

/// Maximum inline headers before heap allocation
/// Most requests have ≤16 headers
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated header storage.
///
/// Header names use `Arc<str>` so repeated names clone cheaply.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

type LoadFuture = BoxFuture<'static, anyhow::Result<Bytes>>;
type Loader = Box<dyn FnOnce() -> LoadFuture + Send>;

/// Deferred request body.
///
/// The loader runs at most once, on the first read; the outcome (bytes or
/// error) is cached for later reads. Concurrent readers wait on the same
/// load. Async code reads with [`Body::bytes`] / [`Body::json`]; code on the
/// blocking pool uses [`Body::blocking_bytes`] / [`Body::blocking_json`].
///
/// A read that is cancelled while the loader is running leaves the body
/// unreadable for the rest of the request.
pub struct Body {
    outcome: OnceCell<Result<Bytes, Arc<str>>>,
    loader: parking_lot::Mutex<Option<Loader>>,
    runtime: Option<Handle>,
}

/// Reading or decoding the request body failed
#[derive(Debug, Clone, Error)]
pub enum BodyError {
    /// The transport's loader failed
    #[error("failed to read request body: {0}")]
    Read(Arc<str>),
    /// Body is not valid JSON for the requested type
    #[error("invalid JSON body: {0}")]
    Json(Arc<str>),
}

impl Body {
    /// No body
    #[must_use]
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Body already in memory
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            outcome: OnceCell::new_with(Some(Ok(bytes.into()))),
            loader: parking_lot::Mutex::new(None),
            runtime: None,
        }
    }

    /// Body read on first access by the async `loader`.
    ///
    /// When built inside a tokio runtime, blocking reads drive the loader on
    /// that runtime.
    #[must_use]
    pub fn deferred<F, Fut>(loader: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
    {
        let loader: Loader = Box::new(move || loader().boxed());
        Self {
            outcome: OnceCell::new(),
            loader: parking_lot::Mutex::new(Some(loader)),
            runtime: Handle::try_current().ok(),
        }
    }

    /// `true` once the body has been read (or failed)
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.outcome.initialized()
    }

    /// Raw body bytes, running the loader if needed.
    ///
    /// # Errors
    ///
    /// [`BodyError::Read`] if the loader failed or panicked (now or on an
    /// earlier read).
    pub async fn bytes(&self) -> Result<Bytes, BodyError> {
        self.outcome
            .get_or_init(|| self.load())
            .await
            .clone()
            .map_err(BodyError::Read)
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// [`BodyError::Read`] or [`BodyError::Json`].
    pub async fn json<T: DeserializeOwned>(&self) -> Result<T, BodyError> {
        decode_json(&self.bytes().await?)
    }

    /// [`Body::bytes`] for synchronous callers such as blocking handlers.
    ///
    /// # Errors
    ///
    /// As [`Body::bytes`], plus [`BodyError::Read`] when called from inside
    /// an async task on a body that has not been read yet.
    pub fn blocking_bytes(&self) -> Result<Bytes, BodyError> {
        if let Some(outcome) = self.outcome.get() {
            return outcome.clone().map_err(BodyError::Read);
        }
        if Handle::try_current().is_ok() {
            return Err(BodyError::Read(Arc::from(
                "blocking body read inside an async task; use `Body::bytes`",
            )));
        }
        match &self.runtime {
            Some(handle) => handle.block_on(self.bytes()),
            None => futures::executor::block_on(self.bytes()),
        }
    }

    /// [`Body::json`] for synchronous callers.
    ///
    /// # Errors
    ///
    /// See [`Body::blocking_bytes`].
    pub fn blocking_json<T: DeserializeOwned>(&self) -> Result<T, BodyError> {
        decode_json(&self.blocking_bytes()?)
    }

    async fn load(&self) -> Result<Bytes, Arc<str>> {
        let loader = self.loader.lock().take();
        let Some(loader) = loader else {
            return Err(Arc::from("body loader was interrupted"));
        };
        let fut = catch_unwind(AssertUnwindSafe(loader))
            .map_err(|p| loader_panicked(p.as_ref()))?;
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(Arc::from(format!("{e:#}"))),
            Err(p) => Err(loader_panicked(p.as_ref())),
        }
    }
}

fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, BodyError> {
    serde_json::from_slice(bytes).map_err(|e| BodyError::Json(Arc::from(e.to_string())))
}

fn loader_panicked(payload: &(dyn Any + Send)) -> Arc<str> {
    Arc::from(format!("body loader panicked: {}", panic_message(payload)))
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.outcome.get() {
            None => "pending".to_string(),
            Some(Ok(b)) => format!("{} bytes", b.len()),
            Some(Err(_)) => "failed".to_string(),
        };
        f.debug_struct("Body").field("state", &state).finish()
    }
}

/// Everything the transport layer knows about one request.
#[derive(Debug)]
pub struct RequestContext {
    /// Correlation id (taken from `x-request-id` when valid)
    pub request_id: RequestId,
    /// HTTP method
    pub method: Method,
    /// Request path as received
    pub path: String,
    /// Query parameters in arrival order; names may repeat
    pub query: Vec<(String, String)>,
    /// Request headers
    pub headers: HeaderVec,
    /// Deferred body
    pub body: Body,
}

impl RequestContext {
    /// Build a context with an empty body and no headers or query
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderVec::new(),
            body: Body::empty(),
        }
    }

    /// Get a header by name (case-insensitive per RFC 7230)
    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get a query parameter by name
    ///
    /// Uses "last write wins" semantics: for `?limit=10&limit=20` this
    /// returns `20`.
    #[inline]
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .rfind(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// All values of a repeated query parameter, in order
    #[must_use]
    pub fn query_values(&self, name: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// A named argument was missing or had the wrong shape
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    /// No argument with this name
    #[error("missing argument `{0}`")]
    Missing(String),
    /// Present but not of the requested type
    #[error("argument `{name}` is {found}, expected {expected}")]
    WrongType {
        /// Argument name
        name: String,
        /// Requested type
        expected: &'static str,
        /// JSON type actually present
        found: &'static str,
    },
    /// Could not deserialize into the requested Rust type
    #[error("argument `{name}` could not be decoded: {reason}")]
    Decode {
        /// Argument name
        name: String,
        /// Deserializer message
        reason: String,
    },
}

/// Named values passed to a handler or dependency provider.
///
/// Cheap to clone: the request context is shared.
#[derive(Debug, Clone)]
pub struct Arguments {
    values: HashMap<Arc<str>, Value>,
    ctx: Arc<RequestContext>,
}

impl Arguments {
    /// Empty argument set bound to `ctx`
    #[must_use]
    pub fn new(ctx: Arc<RequestContext>) -> Self {
        Self {
            values: HashMap::new(),
            ctx,
        }
    }

    /// Argument set built from `values`
    #[must_use]
    pub fn with_values(ctx: Arc<RequestContext>, values: HashMap<Arc<str>, Value>) -> Self {
        Self { values, ctx }
    }

    /// Add or replace a value
    pub fn insert(&mut self, name: impl Into<Arc<str>>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Raw value by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Raw value by name, or [`ArgumentError::Missing`].
    ///
    /// # Errors
    ///
    /// When `name` is absent.
    pub fn require(&self, name: &str) -> Result<&Value, ArgumentError> {
        self.get(name)
            .ok_or_else(|| ArgumentError::Missing(name.to_string()))
    }

    /// Integer argument
    ///
    /// # Errors
    ///
    /// Missing or not an integer.
    pub fn i64(&self, name: &str) -> Result<i64, ArgumentError> {
        let v = self.require(name)?;
        v.as_i64().ok_or_else(|| wrong_type(name, "integer", v))
    }

    /// Float argument (integers are widened)
    ///
    /// # Errors
    ///
    /// Missing or not a number.
    pub fn f64(&self, name: &str) -> Result<f64, ArgumentError> {
        let v = self.require(name)?;
        v.as_f64().ok_or_else(|| wrong_type(name, "number", v))
    }

    /// Boolean argument
    ///
    /// # Errors
    ///
    /// Missing or not a boolean.
    pub fn bool(&self, name: &str) -> Result<bool, ArgumentError> {
        let v = self.require(name)?;
        v.as_bool().ok_or_else(|| wrong_type(name, "boolean", v))
    }

    /// String argument
    ///
    /// # Errors
    ///
    /// Missing or not a string.
    pub fn str(&self, name: &str) -> Result<&str, ArgumentError> {
        let v = self.require(name)?;
        v.as_str().ok_or_else(|| wrong_type(name, "string", v))
    }

    /// Deserialize an argument into any `serde` type
    ///
    /// # Errors
    ///
    /// Missing, or the value does not fit `T`.
    pub fn deserialize<T: DeserializeOwned>(&self, name: &str) -> Result<T, ArgumentError> {
        let v = self.require(name)?;
        T::deserialize(v).map_err(|e| ArgumentError::Decode {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// The request this argument set belongs to
    #[must_use]
    pub fn context(&self) -> &Arc<RequestContext> {
        &self.ctx
    }

    /// Argument names (unordered)
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(AsRef::as_ref)
    }

    /// Number of arguments
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` when there are no arguments
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume into the underlying map
    #[must_use]
    pub fn into_values(self) -> HashMap<Arc<str>, Value> {
        self.values
    }
}

fn wrong_type(name: &str, expected: &'static str, found: &Value) -> ArgumentError {
    ArgumentError::WrongType {
        name: name.to_string(),
        expected,
        found: json_type(found),
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> Arc<RequestContext> {
        let mut ctx = RequestContext::new(Method::GET, "/x");
        ctx.query = vec![
            ("limit".to_string(), "10".to_string()),
            ("tag".to_string(), "a".to_string()),
            ("limit".to_string(), "20".to_string()),
        ];
        ctx.headers.push((Arc::from("Content-Type"), "application/json".to_string()));
        Arc::new(ctx)
    }

    #[test]
    fn test_query_last_wins() {
        let ctx = ctx();
        assert_eq!(ctx.query_param("limit"), Some("20"));
        assert_eq!(ctx.query_values("limit"), vec!["10", "20"]);
        assert_eq!(ctx.query_param("missing"), None);
    }

    #[test]
    fn test_header_case_insensitive() {
        let ctx = ctx();
        assert_eq!(ctx.header("content-type"), Some("application/json"));
        assert_eq!(ctx.header("CONTENT-TYPE"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_deferred_body_loads_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let body = Body::deferred(move || async move {
            c.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(Bytes::from_static(br#"{"name":"rex"}"#))
        });
        assert!(!body.is_loaded());

        let v: Value = body.json().await.unwrap();
        assert_eq!(v, json!({"name": "rex"}));
        assert_eq!(body.bytes().await.unwrap().len(), 14);
        assert_eq!(body.blocking_bytes().unwrap().len(), 14);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(body.is_loaded());
    }

    #[tokio::test]
    async fn test_body_errors_are_cached() {
        let body = Body::deferred(|| async {
            let result: anyhow::Result<Bytes> = Err(anyhow::anyhow!("socket closed"));
            result
        });
        assert!(matches!(body.bytes().await, Err(BodyError::Read(ref m)) if m.contains("socket closed")));
        assert!(matches!(body.bytes().await, Err(BodyError::Read(_))));

        let bad = Body::from_bytes("not json");
        assert!(matches!(bad.json::<Value>().await, Err(BodyError::Json(_))));
    }

    #[tokio::test]
    async fn test_panicking_loader_reports_error() {
        let body = Body::deferred(|| async {
            let fail = true;
            if fail {
                panic!("transport gone");
            }
            anyhow::Ok(Bytes::new())
        });
        let first = body.bytes().await.unwrap_err();
        assert!(first.to_string().contains("transport gone"));
        // Later reads see the same failure instead of hanging
        let second = body.bytes().await.unwrap_err();
        assert!(second.to_string().contains("transport gone"));
        assert!(body.is_loaded());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_readers_share_one_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let body = Arc::new(Body::deferred(move || async move {
            c.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            anyhow::Ok(Bytes::from_static(b"payload"))
        }));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let body = Arc::clone(&body);
                tokio::spawn(async move { body.bytes().await })
            })
            .collect();
        for reader in readers {
            assert_eq!(reader.await.unwrap().unwrap(), Bytes::from_static(b"payload"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_blocking_read_inside_async_task_is_rejected() {
        let body = Body::deferred(|| async { anyhow::Ok(Bytes::from_static(b"x")) });
        assert!(matches!(body.blocking_bytes(), Err(BodyError::Read(_))));
        // Still readable the async way
        assert_eq!(body.bytes().await.unwrap(), Bytes::from_static(b"x"));
    }

    #[test]
    fn test_blocking_read_outside_runtime() {
        let body = Body::deferred(|| async { anyhow::Ok(Bytes::from_static(b"[1,2]")) });
        let v: Vec<i64> = body.blocking_json().unwrap();
        assert_eq!(v, vec![1, 2]);
    }

    #[test]
    fn test_typed_accessors() {
        let mut args = Arguments::new(ctx());
        args.insert("id", json!(42));
        args.insert("ratio", json!(0.5));
        args.insert("flag", json!(true));
        args.insert("name", json!("rex"));

        assert_eq!(args.i64("id").unwrap(), 42);
        assert_eq!(args.f64("id").unwrap(), 42.0);
        assert_eq!(args.f64("ratio").unwrap(), 0.5);
        assert!(args.bool("flag").unwrap());
        assert_eq!(args.str("name").unwrap(), "rex");
        assert_eq!(args.len(), 4);

        assert_eq!(
            args.i64("name").unwrap_err(),
            ArgumentError::WrongType {
                name: "name".to_string(),
                expected: "integer",
                found: "string",
            }
        );
        assert_eq!(
            args.str("nope").unwrap_err(),
            ArgumentError::Missing("nope".to_string())
        );
    }

    #[test]
    fn test_deserialize_argument() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct User {
            id: i64,
        }
        let mut args = Arguments::new(ctx());
        args.insert("user", json!({"id": 7}));
        assert_eq!(args.deserialize::<User>("user").unwrap(), User { id: 7 });
        assert!(matches!(
            args.deserialize::<Vec<i64>>("user"),
            Err(ArgumentError::Decode { .. })
        ));
    }
}
