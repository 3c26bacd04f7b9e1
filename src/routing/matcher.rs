//! Request matching.
//!
//! # Responsibilities
//! - Match the request path against a wildcard pattern (case-sensitive)
//! - Match the Host header against a wildcard pattern (case-insensitive)
//!
//! # Design Decisions
//! - `*` matches any run of characters (including none), `?` exactly one
//! - No regex: the matcher is linear with single-star backtracking
//! - `"*"` alone is the catch-all

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::routing::rules::RuleError;

/// Routing-relevant parts of a request.
#[derive(Debug, Clone, Copy)]
pub struct RouteRequest<'a> {
    pub host: Option<&'a str>,
    pub path: &'a str,
}

impl<'a> RouteRequest<'a> {
    pub fn path(path: &'a str) -> Self {
        Self { host: None, path }
    }
}

/// Wildcard path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathPattern(String);

impl PathPattern {
    pub fn new(raw: impl Into<String>) -> Result<Self, RuleError> {
        let raw = raw.into();
        if raw != "*" && !raw.starts_with('/') {
            return Err(RuleError::InvalidPattern(raw));
        }
        Ok(Self(raw))
    }

    pub fn catch_all() -> Self {
        Self("*".to_string())
    }

    pub fn is_catch_all(&self) -> bool {
        self.0 == "*"
    }

    pub fn matches(&self, path: &str) -> bool {
        wildcard_match(self.0.as_bytes(), path.as_bytes())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PathPattern {
    type Error = RuleError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PathPattern> for String {
    fn from(p: PathPattern) -> Self {
        p.0
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wildcard host pattern, normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostPattern(String);

impl HostPattern {
    pub fn new(raw: impl Into<String>) -> Result<Self, RuleError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(RuleError::InvalidPattern(raw));
        }
        Ok(Self(raw.to_lowercase()))
    }

    /// Port suffix on the Host header is ignored.
    pub fn matches(&self, host: &str) -> bool {
        let host = host.rsplit_once(':').map_or(host, |(h, port)| {
            if port.chars().all(|c| c.is_ascii_digit()) {
                h
            } else {
                host
            }
        });
        wildcard_match(self.0.as_bytes(), host.to_lowercase().as_bytes())
    }
}

impl TryFrom<String> for HostPattern {
    type Error = RuleError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<HostPattern> for String {
    fn from(p: HostPattern) -> Self {
        p.0
    }
}

fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // position of the last '*' and the text index it is currently absorbing up to
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}
