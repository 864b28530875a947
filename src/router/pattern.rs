//! Route pattern parsing.
//!
//! A pattern is a `/`-separated list of segments. A segment is either plain
//! literal text (`users`) or a template mixing literal text with
//! placeholders (`{id}`, `{id:int}`, `{stem}.{ext}`). Any template segment
//! makes the whole route dynamic; fully literal patterns go into the trie.
//!
//! Patterns are written in decoded form (`/café`, not `/caf%C3%A9`). Request
//! paths are matched both as sent and with literal text percent-encoded.

use regex::Regex;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;

use super::params::ParamKind;

/// One piece of a template segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentPart {
    /// Literal text that must appear verbatim
    Literal(Box<str>),
    /// Named placeholder with an optional inline kind (`{name:kind}`)
    Param {
        /// Placeholder name
        name: Arc<str>,
        /// Kind written inline in the pattern, if any
        kind: Option<ParamKind>,
    },
}

/// Parsed path segment descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Fully literal segment
    Literal(Box<str>),
    /// Segment containing at least one placeholder
    Template(Vec<SegmentPart>),
}

/// Errors raised while parsing a route pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// `{` without a matching `}` (or a stray `}`)
    #[error("unbalanced braces in segment `{segment}` of `{pattern}`")]
    UnbalancedBraces {
        /// Full pattern text
        pattern: String,
        /// Offending segment
        segment: String,
    },
    /// Placeholder name is empty or not an identifier
    #[error("invalid parameter name `{name}` in `{pattern}`")]
    InvalidName {
        /// Full pattern text
        pattern: String,
        /// Offending name
        name: String,
    },
    /// Same placeholder name used twice
    #[error("duplicate parameter `{name}` in `{pattern}`")]
    DuplicateParam {
        /// Full pattern text
        pattern: String,
        /// Repeated name
        name: String,
    },
    /// Inline kind annotation not recognised
    #[error("unknown parameter kind `{kind}` for `{name}` in `{pattern}`")]
    UnknownKind {
        /// Full pattern text
        pattern: String,
        /// Placeholder name
        name: String,
        /// Annotation as written
        kind: String,
    },
    /// Generated matcher failed to compile
    #[error("pattern `{pattern}` did not compile: {reason}")]
    Compile {
        /// Full pattern text
        pattern: String,
        /// Compiler message
        reason: String,
    },
}

/// A parsed route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parse a pattern such as `/users/{id:int}/posts`.
    ///
    /// Leading, trailing and doubled slashes are insignificant, so `/a//b/`
    /// and `/a/b` parse to the same segments.
    ///
    /// # Errors
    ///
    /// Returns a [`PatternError`] for malformed braces, invalid or duplicate
    /// names and unknown inline kinds.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let mut segments = Vec::new();
        let mut seen: Vec<Arc<str>> = Vec::new();

        for seg in split_path(raw) {
            if !seg.contains(['{', '}']) {
                segments.push(Segment::Literal(seg.into()));
                continue;
            }
            let parts = parse_template(raw, seg)?;
            for part in &parts {
                if let SegmentPart::Param { name, .. } = part {
                    if seen.iter().any(|n| n == name) {
                        return Err(PatternError::DuplicateParam {
                            pattern: raw.to_string(),
                            name: name.to_string(),
                        });
                    }
                    seen.push(Arc::clone(name));
                }
            }
            segments.push(Segment::Template(parts));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Pattern text as registered
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Ordered segment descriptors
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// `true` when no segment contains a placeholder
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Placeholders in order of appearance with their inline kinds
    #[must_use]
    pub fn params(&self) -> Vec<(Arc<str>, Option<ParamKind>)> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Template(parts) => Some(parts),
                Segment::Literal(_) => None,
            })
            .flatten()
            .filter_map(|p| match p {
                SegmentPart::Param { name, kind } => Some((Arc::clone(name), *kind)),
                SegmentPart::Literal(_) => None,
            })
            .collect()
    }

    /// Literal segments of a static pattern (empty for `/`)
    pub fn literal_segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Literal(text) => Some(text.as_ref()),
            Segment::Template(_) => None,
        })
    }

    /// Compile to an anchored regex with one named group per placeholder.
    ///
    /// `/users/{id}` becomes `^/users/(?P<id>[^/]+)$`; the root pattern
    /// becomes `^/$`.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::Compile`] if the generated expression is rejected.
    pub fn compile(&self) -> Result<Regex, PatternError> {
        if self.segments.is_empty() {
            return Regex::new(r"^/$").map_err(|e| self.compile_error(&e));
        }

        let mut expr = String::with_capacity(self.raw.len() + 16);
        expr.push('^');
        for segment in &self.segments {
            expr.push('/');
            match segment {
                Segment::Literal(text) => expr.push_str(&literal_expr(text)),
                Segment::Template(parts) => {
                    for part in parts {
                        match part {
                            SegmentPart::Literal(text) => expr.push_str(&literal_expr(text)),
                            SegmentPart::Param { name, .. } => {
                                expr.push_str("(?P<");
                                expr.push_str(name);
                                expr.push_str(">[^/]+)");
                            }
                        }
                    }
                }
            }
        }
        expr.push('$');

        Regex::new(&expr).map_err(|e| self.compile_error(&e))
    }

    /// Substitute placeholder values to build a concrete path.
    ///
    /// Values are percent-encoded. Returns the name of the first placeholder
    /// for which `lookup` yields nothing.
    pub fn render<F>(&self, mut lookup: F) -> Result<String, Arc<str>>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if self.segments.is_empty() {
            return Ok("/".to_string());
        }
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Literal(text) => out.push_str(&urlencoding::encode(text)),
                Segment::Template(parts) => {
                    for part in parts {
                        match part {
                            SegmentPart::Literal(text) => out.push_str(&urlencoding::encode(text)),
                            SegmentPart::Param { name, .. } => {
                                let value = lookup(name).ok_or_else(|| Arc::clone(name))?;
                                out.push_str(&urlencoding::encode(&value));
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn compile_error(&self, err: &regex::Error) -> PatternError {
        PatternError::Compile {
            pattern: self.raw.clone(),
            reason: err.to_string(),
        }
    }
}

/// Regex for literal text that also accepts its percent-encoded spelling
fn literal_expr(text: &str) -> String {
    let plain = regex::escape(text);
    let encoded = urlencoding::encode(text);
    if encoded == text {
        plain
    } else {
        format!("(?:{plain}|{})", regex::escape(&encoded))
    }
}

fn parse_template(pattern: &str, seg: &str) -> Result<Vec<SegmentPart>, PatternError> {
    let unbalanced = || PatternError::UnbalancedBraces {
        pattern: pattern.to_string(),
        segment: seg.to_string(),
    };

    let mut parts = Vec::new();
    let mut rest = seg;
    while !rest.is_empty() {
        match rest.find(['{', '}']) {
            None => {
                parts.push(SegmentPart::Literal(rest.into()));
                break;
            }
            Some(idx) if rest.as_bytes()[idx] == b'}' => return Err(unbalanced()),
            Some(idx) => {
                if idx > 0 {
                    parts.push(SegmentPart::Literal(rest[..idx].into()));
                }
                let after = &rest[idx + 1..];
                let close = after.find('}').ok_or_else(unbalanced)?;
                let inner = &after[..close];
                if inner.contains('{') {
                    return Err(unbalanced());
                }
                parts.push(parse_placeholder(pattern, inner)?);
                rest = &after[close + 1..];
            }
        }
    }
    Ok(parts)
}

fn parse_placeholder(pattern: &str, inner: &str) -> Result<SegmentPart, PatternError> {
    let (name, kind) = match inner.split_once(':') {
        Some((name, kind)) => (name.trim(), Some(kind.trim())),
        None => (inner.trim(), None),
    };

    if !is_identifier(name) {
        return Err(PatternError::InvalidName {
            pattern: pattern.to_string(),
            name: name.to_string(),
        });
    }

    let kind = match kind {
        None => None,
        Some(k) => Some(ParamKind::parse(k).ok_or_else(|| PatternError::UnknownKind {
            pattern: pattern.to_string(),
            name: name.to_string(),
            kind: k.to_string(),
        })?),
    };

    Ok(SegmentPart::Param {
        name: Arc::from(name),
        kind,
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split a path into its non-empty segments, ignoring any `?query` suffix.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    path.split('/').filter(|s| !s.is_empty())
}

/// Percent-decoded segments of a request path.
///
/// A segment that does not decode to UTF-8 is kept as sent.
#[must_use]
pub fn decoded_segments(path: &str) -> SmallVec<[Cow<'_, str>; 8]> {
    split_path(path)
        .map(|seg| urlencoding::decode(seg).unwrap_or(Cow::Borrowed(seg)))
        .collect()
}

/// Canonical `/a/b` form of a request path (`/` for the root).
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for seg in split_path(path) {
        out.push('/');
        out.push_str(seg);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}
