//! Producers that feed the pipeline
//!
//! Each producer holds its own [`crate::Pipeline`] handle and translates one
//! ambient signal source into breadcrumbs and events:
//!
//! - [`DomBreadcrumbs`] - UI interactions become `ui.<kind>` breadcrumbs
//! - [`HttpFailures`] - observed HTTP exchanges become `http` breadcrumbs and,
//!   for failed requests, error events
//!
//! Input from these sources is untrusted. Extraction helpers return `Option`
//! so malformed input is skipped before anything reaches `capture`.

pub mod dom;
pub mod http;

pub use dom::{DomBreadcrumbs, DomEvent, DomOptions};
pub use http::{Headers, HttpExchange, HttpFailures, HttpFailuresOptions};

use crate::error::{Result, VigilError};
use regex::Regex;

/// Matches a URL or other target string
#[derive(Debug, Clone)]
pub enum TargetMatcher {
    /// Substring match
    Literal(String),
    /// Regular expression match
    Pattern(Regex),
}

impl TargetMatcher {
    pub fn literal(s: impl Into<String>) -> Self {
        TargetMatcher::Literal(s.into())
    }

    /// Compile a regex matcher
    ///
    /// # Errors
    /// Returns `VigilError::Config` if the pattern does not compile
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(TargetMatcher::Pattern)
            .map_err(|e| VigilError::Config(format!("invalid target pattern {pattern:?}: {e}")))
    }

    pub fn matches(&self, target: &str) -> bool {
        match self {
            TargetMatcher::Literal(s) => target.contains(s.as_str()),
            TargetMatcher::Pattern(re) => re.is_match(target),
        }
    }
}

/// Matches an HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMatcher {
    Exact(u16),
    /// Inclusive range
    Range(u16, u16),
}

impl StatusMatcher {
    pub fn matches(&self, status: u16) -> bool {
        match *self {
            StatusMatcher::Exact(code) => status == code,
            StatusMatcher::Range(lo, hi) => (lo..=hi).contains(&status),
        }
    }
}

/// Truncate to at most `max` characters, marking the cut with `...`
pub(crate) fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
