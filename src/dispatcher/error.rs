use http::Method;
use serde_json::{json, Value};
use thiserror::Error;

use super::response::HandlerResponse;
use crate::dependency::{DependencyGraphError, DependencyResolutionError};
use crate::error::HttpError;
use crate::executor::ExecutionError;
use crate::ids::{RequestId, REQUEST_ID_HEADER};
use crate::router::{ParamConversionError, RegisterError, RouteError};

/// Route registration rejected by [`Dispatcher::register`](super::Dispatcher::register).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Pattern, conflict or naming problem in the route table
    #[error(transparent)]
    Route(#[from] RegisterError),
    /// Invalid dependency declarations
    #[error(transparent)]
    Dependency(#[from] DependencyGraphError),
    /// A query parameter reuses a path placeholder or another query name
    #[error("parameter `{name}` is declared twice")]
    DuplicateParameter {
        /// Repeated name
        name: String,
    },
}

/// Typed failure of one request.
///
/// Every variant has a fixed status, see [`DispatchError::status`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No route for the path under any method (404)
    #[error("no route matches {method} {path}")]
    NotFound {
        /// Requested method
        method: Method,
        /// Requested path
        path: String,
    },
    /// The path exists under other methods (405)
    #[error("{method} not allowed for {path}")]
    MethodNotAllowed {
        /// Requested method
        method: Method,
        /// Requested path
        path: String,
        /// Methods that would match, sorted
        allowed: Vec<Method>,
    },
    /// A path or query value failed typed conversion (400)
    #[error(transparent)]
    ParamConversion(#[from] ParamConversionError),
    /// A required query parameter is absent (400)
    #[error("missing required query parameter `{name}`")]
    MissingParameter {
        /// Parameter name
        name: String,
    },
    /// A dependency provider failed (its `HttpError` status, else 500)
    #[error(transparent)]
    Dependency(#[from] DependencyResolutionError),
    /// The handler returned an [`HttpError`]
    #[error(transparent)]
    Http(HttpError),
    /// The handler failed with any other error (500)
    #[error("handler failed: {0}")]
    Handler(anyhow::Error),
    /// The handler panicked (500)
    #[error("handler panicked: {0}")]
    Panicked(String),
    /// The blocking worker pool is shut down (503)
    #[error("blocking worker pool is shut down")]
    Unavailable,
}

impl From<RouteError> for DispatchError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::NotFound { method, path } => Self::NotFound { method, path },
            RouteError::MethodNotAllowed {
                method,
                path,
                allowed,
            } => Self::MethodNotAllowed {
                method,
                path,
                allowed,
            },
            RouteError::ParamConversion(e) => Self::ParamConversion(e),
        }
    }
}

impl From<ExecutionError> for DispatchError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Failed(e) => match e.downcast::<HttpError>() {
                Ok(http) => Self::Http(http),
                Err(other) => Self::Handler(other),
            },
            ExecutionError::Panicked(msg) => Self::Panicked(msg),
            ExecutionError::PoolClosed => Self::Unavailable,
        }
    }
}

impl DispatchError {
    /// HTTP status for this error
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::MethodNotAllowed { .. } => 405,
            Self::ParamConversion(_) | Self::MissingParameter { .. } => 400,
            Self::Dependency(e) => e.status(),
            Self::Http(e) => e.status,
            Self::Handler(_) | Self::Panicked(_) => 500,
            Self::Unavailable => 503,
        }
    }

    /// Render as a JSON error response.
    ///
    /// Internal failures are reported without their message; the request id
    /// in the body and the `x-request-id` header links the response to logs.
    #[must_use]
    pub fn into_response(self, request_id: &RequestId) -> HandlerResponse {
        let status = self.status();
        let message = self.to_string();
        let rid = request_id.to_string();
        let mut resp = match self {
            Self::Http(err) => {
                let mut resp = HandlerResponse::json(
                    status,
                    json!({ "error": err.detail, "request_id": rid }),
                );
                for (name, value) in err.headers {
                    resp.set_header(&name, value);
                }
                resp
            }
            Self::Dependency(err) => {
                let detail = err
                    .http_error()
                    .map_or_else(|| Value::from("Internal Server Error"), |e| e.detail.clone());
                let mut resp = HandlerResponse::json(
                    status,
                    json!({ "error": detail, "dependency": err.dependency.as_ref(), "request_id": rid }),
                );
                if let Some(http) = err.http_error() {
                    for (name, value) in &http.headers {
                        resp.set_header(name, value.clone());
                    }
                }
                resp
            }
            Self::MethodNotAllowed { allowed, .. } => {
                let allow = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut resp = HandlerResponse::json(
                    status,
                    json!({ "error": message, "request_id": rid }),
                );
                resp.set_header("allow", allow);
                resp
            }
            Self::Handler(_) | Self::Panicked(_) => HandlerResponse::json(
                status,
                json!({ "error": "Internal Server Error", "request_id": rid }),
            ),
            Self::Unavailable => HandlerResponse::json(
                status,
                json!({ "error": "Service Unavailable", "request_id": rid }),
            ),
            Self::NotFound { .. } | Self::ParamConversion(_) | Self::MissingParameter { .. } => {
                HandlerResponse::json(status, json!({ "error": message, "request_id": rid }))
            }
        };
        resp.set_header(REQUEST_ID_HEADER, request_id.to_string());
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::ParamKind;
    use std::sync::Arc;

    #[test]
    fn test_status_mapping() {
        let not_found = DispatchError::NotFound {
            method: Method::GET,
            path: "/x".into(),
        };
        assert_eq!(not_found.status(), 404);

        let conversion = DispatchError::ParamConversion(ParamConversionError {
            name: Arc::from("id"),
            value: "abc".into(),
            expected: ParamKind::Int,
        });
        assert_eq!(conversion.status(), 400);

        assert_eq!(DispatchError::Panicked("boom".into()).status(), 500);
        assert_eq!(DispatchError::Unavailable.status(), 503);
    }

    #[test]
    fn test_http_error_is_recovered_from_handler_failure() {
        let err: DispatchError =
            ExecutionError::Failed(HttpError::forbidden("nope").into()).into();
        assert_eq!(err.status(), 403);

        let opaque: DispatchError = ExecutionError::Failed(anyhow::anyhow!("db down")).into();
        assert_eq!(opaque.status(), 500);
    }

    #[test]
    fn test_method_not_allowed_sets_allow_header() {
        let rid = RequestId::new();
        let resp = DispatchError::MethodNotAllowed {
            method: Method::DELETE,
            path: "/users".into(),
            allowed: vec![Method::GET, Method::POST],
        }
        .into_response(&rid);
        assert_eq!(resp.status, 405);
        assert_eq!(resp.get_header("allow"), Some("GET, POST"));
        assert_eq!(resp.get_header("x-request-id"), Some(rid.to_string().as_str()));
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let resp = DispatchError::Handler(anyhow::anyhow!("password=hunter2"))
            .into_response(&RequestId::new());
        assert_eq!(resp.status, 500);
        assert!(!resp.body.to_string().contains("hunter2"));
    }
}
