//! Typed path/query parameter conversion.
//!
//! Every captured value is converted to its declared [`ParamKind`] by a total,
//! pure function. Failures carry the parameter name and the raw value so the
//! dispatcher can answer `400 Bad Request` with a precise message.

use serde_json::{Number, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Declared semantic type of a path or query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParamKind {
    /// Signed 64-bit integer
    Int,
    /// Finite 64-bit float
    Float,
    /// `true/false/1/0/yes/no/on/off`, case-insensitive
    Bool,
    /// Percent-decoded text, unchanged
    #[default]
    Str,
}

impl ParamKind {
    /// Parse the kind annotation used inside `{name:kind}` placeholders.
    ///
    /// Accepts `int`/`integer`, `float`/`number`, `bool`/`boolean` and
    /// `str`/`string`. Returns `None` for anything else.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "int" | "integer" => Some(Self::Int),
            "float" | "number" => Some(Self::Float),
            "bool" | "boolean" => Some(Self::Bool),
            "str" | "string" => Some(Self::Str),
            _ => None,
        }
    }

    /// Canonical short name (`int`, `float`, `bool`, `str`)
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Str => "str",
        }
    }

    /// Convert a raw (already percent-decoded) value to this kind.
    ///
    /// # Errors
    ///
    /// Returns [`ParamConversionError`] naming `name` and `raw` when the value
    /// does not parse as the declared kind.
    pub fn convert(self, name: &str, raw: &str) -> Result<Value, ParamConversionError> {
        let fail = || ParamConversionError {
            name: Arc::from(name),
            value: raw.to_string(),
            expected: self,
        };
        match self {
            Self::Int => raw.parse::<i64>().map(Value::from).map_err(|_| fail()),
            Self::Float => raw
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(fail),
            Self::Bool => parse_bool(raw).map(Value::Bool).ok_or_else(fail),
            Self::Str => Ok(Value::String(raw.to_string())),
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown parameter kind `{s}`"))
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// A path or query value failed typed conversion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parameter `{name}`: cannot convert `{value}` to {expected}")]
pub struct ParamConversionError {
    /// Parameter name as declared in the route pattern
    pub name: Arc<str>,
    /// The raw value that failed to convert
    pub value: String,
    /// The declared kind
    pub expected: ParamKind,
}
