use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::context::HeaderVec;

/// Normalized handler output: status, headers and JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerResponse {
    /// HTTP status code (200, 404, 500, etc.)
    pub status: u16,
    /// HTTP response headers (stack-allocated for ≤16 headers)
    #[serde(skip_serializing)]
    pub headers: HeaderVec,
    /// Response body as JSON
    pub body: Value,
}

impl HandlerResponse {
    /// Create a new response with the given status, headers, and body
    #[must_use]
    pub fn new(status: u16, headers: HeaderVec, body: Value) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Create a JSON response with default headers
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), "application/json".to_string()));
        Self {
            status,
            headers,
            body,
        }
    }

    /// Create an error response
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }))
    }

    /// Get a header by name
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or update a header
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    /// `true` for 2xx statuses
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// What a handler returns.
///
/// Handlers usually return a bare [`Value`] (answered with 200) or a
/// `(Value, status)` pair; [`Reply::Full`] gives control over headers.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Body answered with 200
    Body(Value),
    /// Body with an explicit status
    WithStatus(Value, u16),
    /// Complete response; a missing content type is filled in
    Full(HandlerResponse),
}

impl Reply {
    /// Normalize into a [`HandlerResponse`]
    #[must_use]
    pub fn into_response(self) -> HandlerResponse {
        match self {
            Self::Body(body) => HandlerResponse::json(200, body),
            Self::WithStatus(body, status) => HandlerResponse::json(status, body),
            Self::Full(mut resp) => {
                if resp.get_header("content-type").is_none() {
                    resp.set_header("content-type", "application/json".to_string());
                }
                resp
            }
        }
    }
}

impl From<Value> for Reply {
    fn from(body: Value) -> Self {
        Self::Body(body)
    }
}

impl From<(Value, u16)> for Reply {
    fn from((body, status): (Value, u16)) -> Self {
        Self::WithStatus(body, status)
    }
}

impl From<HandlerResponse> for Reply {
    fn from(resp: HandlerResponse) -> Self {
        Self::Full(resp)
    }
}
