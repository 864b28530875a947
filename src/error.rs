//! Domain error for handlers and providers.
//!
//! Returning an [`HttpError`] (through `anyhow`) from a handler or a
//! dependency provider picks the response status, detail and extra headers.
//! Any other error becomes an opaque `500`.
//!
//! ```rust
//! use switchyard::HttpError;
//!
//! fn load(id: i64) -> anyhow::Result<serde_json::Value> {
//!     if id < 0 {
//!         return Err(HttpError::not_found(format!("no pet {id}")).into());
//!     }
//!     Ok(serde_json::json!({ "id": id }))
//! }
//! # assert!(load(-1).is_err());
//! ```

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::context::{ArgumentError, BodyError, HeaderVec};

/// An error carrying an HTTP status.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpError {
    /// HTTP status code
    pub status: u16,
    /// Error detail rendered into the response body
    pub detail: Value,
    /// Extra response headers (e.g. `www-authenticate`)
    pub headers: HeaderVec,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Value::String(s) => write!(f, "{} {}", self.status, s),
            other => write!(f, "{} {}", self.status, other),
        }
    }
}

impl std::error::Error for HttpError {}

impl HttpError {
    /// Error with an explicit status and detail
    #[must_use]
    pub fn new(status: u16, detail: impl Into<Value>) -> Self {
        Self {
            status,
            detail: detail.into(),
            headers: HeaderVec::new(),
        }
    }

    /// Replace the detail
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<Value>) -> Self {
        self.detail = detail.into();
        self
    }

    /// Add a response header
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((Arc::from(name), value.into()));
        self
    }

    /// 400 Bad Request
    #[must_use]
    pub fn bad_request(detail: impl Into<Value>) -> Self {
        Self::new(400, detail)
    }

    /// 401 Unauthorized
    #[must_use]
    pub fn unauthorized(detail: impl Into<Value>) -> Self {
        Self::new(401, detail)
    }

    /// 403 Forbidden
    #[must_use]
    pub fn forbidden(detail: impl Into<Value>) -> Self {
        Self::new(403, detail)
    }

    /// 404 Not Found
    #[must_use]
    pub fn not_found(detail: impl Into<Value>) -> Self {
        Self::new(404, detail)
    }

    /// 405 Method Not Allowed
    #[must_use]
    pub fn method_not_allowed(detail: impl Into<Value>) -> Self {
        Self::new(405, detail)
    }

    /// 409 Conflict
    #[must_use]
    pub fn conflict(detail: impl Into<Value>) -> Self {
        Self::new(409, detail)
    }

    /// 422 Unprocessable Entity
    #[must_use]
    pub fn unprocessable(detail: impl Into<Value>) -> Self {
        Self::new(422, detail)
    }

    /// 500 Internal Server Error
    #[must_use]
    pub fn internal(detail: impl Into<Value>) -> Self {
        Self::new(500, detail)
    }
}

impl From<BodyError> for HttpError {
    fn from(err: BodyError) -> Self {
        match err {
            BodyError::Json(_) => Self::bad_request(err.to_string()),
            BodyError::Read(_) => Self::bad_request("request body could not be read"),
        }
    }
}

impl From<ArgumentError> for HttpError {
    fn from(err: ArgumentError) -> Self {
        Self::unprocessable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constructors_set_status() {
        assert_eq!(HttpError::bad_request("x").status, 400);
        assert_eq!(HttpError::unauthorized("x").status, 401);
        assert_eq!(HttpError::forbidden("x").status, 403);
        assert_eq!(HttpError::not_found("x").status, 404);
        assert_eq!(HttpError::method_not_allowed("x").status, 405);
        assert_eq!(HttpError::conflict("x").status, 409);
        assert_eq!(HttpError::unprocessable("x").status, 422);
        assert_eq!(HttpError::internal("x").status, 500);
    }

    #[test]
    fn test_structured_detail_and_headers() {
        let err = HttpError::unauthorized("token expired")
            .with_detail(json!({"reason": "expired"}))
            .with_header("www-authenticate", "Bearer");
        assert_eq!(err.detail, json!({"reason": "expired"}));
        assert_eq!(err.headers[0].1, "Bearer");
        assert_eq!(err.to_string(), r#"401 {"reason":"expired"}"#);
    }

    #[test]
    fn test_survives_anyhow_round_trip() {
        let err: anyhow::Error = HttpError::conflict("taken").into();
        let back = err.downcast_ref::<HttpError>().unwrap();
        assert_eq!(back.status, 409);
        assert_eq!(err.to_string(), "409 taken");
    }

    #[test]
    fn test_body_errors_are_client_errors() {
        let err = HttpError::from(BodyError::Json(Arc::from("eof")));
        assert_eq!(err.status, 400);
    }
}
