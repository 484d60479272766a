//! Collector-driven rate limits
//!
//! The collector tells the client to back off per category, either with a
//! plain `Retry-After` header or with the structured rate-limit header:
//!
//! ```text
//! X-Vigil-Rate-Limits: 60:error;transaction:organization, 2700::organization
//!                      ^^ ^^^^^^^^^^^^^^^^^ ^^^^^^^^^^^^
//!                      |  categories        scope (ignored)
//!                      seconds; empty category list = all categories
//! ```
//!
//! Limits are tracked per category. A wildcard limit covers every category and
//! is checked first.

use crate::clock::{Clock, SystemClock};
use crate::event::Category;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Name of the structured rate-limit response header
pub const RATE_LIMITS_HEADER: &str = "x-vigil-rate-limits";

/// Backoff applied when a 429 carries no usable header
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Longest backoff honored from a single collector instruction
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// One backoff instruction from the collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    /// `None` applies to all categories
    pub category: Option<Category>,
    pub retry_after: Duration,
}

impl RateLimit {
    pub fn new(category: impl Into<Category>, retry_after: Duration) -> Self {
        Self {
            category: Some(category.into()),
            retry_after,
        }
    }

    /// A limit covering every category
    pub fn all(retry_after: Duration) -> Self {
        Self {
            category: None,
            retry_after,
        }
    }
}

#[derive(Default)]
struct Limits {
    all: Option<Instant>,
    categories: HashMap<Category, Instant>,
}

/// Per-category suppression windows
///
/// Thread-safe; reads take a shared lock.
pub struct RateLimiter {
    limits: RwLock<Limits>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter backed by the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            limits: RwLock::new(Limits::default()),
            clock,
        }
    }

    /// Whether captures of `category` must currently be dropped
    pub fn is_limited(&self, category: &Category) -> bool {
        let now = self.clock.now();
        let limits = self.limits.read();

        if limits.all.is_some_and(|until| now < until) {
            return true;
        }
        limits
            .categories
            .get(category)
            .is_some_and(|until| now < *until)
    }

    /// Extend the limit for `category` (`None` = all) to `now + retry_after`
    ///
    /// An existing longer limit is kept. `retry_after` is capped at
    /// [`MAX_RETRY_AFTER`].
    pub fn update(&self, category: Option<&Category>, retry_after: Duration) {
        let retry_after = retry_after.min(MAX_RETRY_AFTER);
        let now = self.clock.now();
        let until = now.checked_add(retry_after).unwrap_or(now);
        let mut limits = self.limits.write();

        match category {
            None => limits.all = Some(limits.all.map_or(until, |t| t.max(until))),
            Some(c) => {
                limits
                    .categories
                    .entry(c.clone())
                    .and_modify(|t| *t = (*t).max(until))
                    .or_insert(until);
            }
        }
        drop(limits);

        tracing::debug!(
            category = category.map_or("all", |c| c.as_str()),
            ?retry_after,
            "rate limit updated"
        );
    }

    /// Apply every limit from a transport outcome
    pub fn apply(&self, limits: &[RateLimit]) {
        for limit in limits {
            self.update(limit.category.as_ref(), limit.retry_after);
        }
    }

    /// When captures of `category` resume, if currently limited
    pub fn limited_until(&self, category: &Category) -> Option<Instant> {
        let now = self.clock.now();
        let limits = self.limits.read();
        let all = limits.all.filter(|until| now < *until);
        let own = limits
            .categories
            .get(category)
            .copied()
            .filter(|until| now < *until);
        all.max(own)
    }

    /// Remove expired entries
    pub fn prune(&self) {
        let now = self.clock.now();
        let mut limits = self.limits.write();
        if limits.all.is_some_and(|until| now >= until) {
            limits.all = None;
        }
        limits.categories.retain(|_, until| now < *until);
    }

    /// Number of tracked category entries (excluding the wildcard)
    pub fn len(&self) -> usize {
        self.limits.read().categories.len()
    }

    pub fn is_empty(&self) -> bool {
        let limits = self.limits.read();
        limits.all.is_none() && limits.categories.is_empty()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a `Retry-After` value given in seconds (integer or fractional)
///
/// Values beyond [`MAX_RETRY_AFTER`] are clamped. Negative, non-finite and
/// HTTP-date values yield `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if secs.is_nan() || secs < 0.0 || secs.is_infinite() {
        return None;
    }
    let parsed = Duration::try_from_secs_f64(secs).unwrap_or(MAX_RETRY_AFTER);
    Some(parsed.min(MAX_RETRY_AFTER))
}

/// Parse the structured rate-limit header into individual limits
///
/// Malformed entries are skipped.
pub fn parse_rate_limits(value: &str) -> Vec<RateLimit> {
    let mut out = Vec::new();

    for entry in value.split(',') {
        let mut fields = entry.trim().split(':');
        let Some(retry_after) = fields.next().and_then(parse_retry_after) else {
            continue;
        };

        let categories = fields.next().unwrap_or("").trim();
        if categories.is_empty() {
            out.push(RateLimit::all(retry_after));
            continue;
        }

        out.extend(
            categories
                .split(';')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|c| RateLimit::new(c, retry_after)),
        );
    }

    out
}
