//! Transport system for vigil-sdk
//!
//! A transport delivers one sealed [`Envelope`] and reports what the collector
//! said. It never retries on its own: retry, drop and rate-limit decisions are
//! made by the flush path from the returned [`SendOutcome`].
//!
//! # Example
//!
//! ```ignore
//! struct MyTransport {
//!     client: MyClient,
//! }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     fn name(&self) -> &'static str { "my-transport" }
//!
//!     async fn send(&self, envelope: &Envelope) -> SendOutcome {
//!         match self.client.post(envelope.body().clone()).await {
//!             Ok(status) => classify_response(status, None, None, &envelope.categories()),
//!             Err(e) => SendOutcome::NetworkFailure(e.to_string()),
//!         }
//!     }
//! }
//! ```

pub mod http;
pub mod stdout;

use crate::envelope::Envelope;
use crate::error::Result;
use crate::event::Category;
use crate::rate_limit::{DEFAULT_RETRY_AFTER, RateLimit, parse_rate_limits, parse_retry_after};
use async_trait::async_trait;
use std::collections::BTreeSet;

pub use http::HttpTransport;
pub use stdout::StdoutTransport;

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Collector accepted the batch (2xx)
    Delivered,
    /// Connection failure, timeout, or 5xx; retryable
    NetworkFailure(String),
    /// Collector asked the client to back off
    RateLimited(Vec<RateLimit>),
    /// Collector rejected the batch; terminal
    ClientError(u16),
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }
}

/// Transport trait - delivers envelopes to a collector
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for identification and logging
    fn name(&self) -> &'static str;

    /// Deliver one envelope
    ///
    /// Implementations must not panic and must map every failure into a
    /// [`SendOutcome`].
    async fn send(&self, envelope: &Envelope) -> SendOutcome;

    /// Release connections; called once at pipeline shutdown
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Map an HTTP response to an outcome
///
/// * `retry_after` - raw `Retry-After` header value, if any
/// * `rate_limits` - raw structured rate-limit header value, if any
/// * `categories` - event categories in the batch, used to scope `Retry-After`
pub fn classify_response(
    status: u16,
    retry_after: Option<&str>,
    rate_limits: Option<&str>,
    categories: &BTreeSet<Category>,
) -> SendOutcome {
    match status {
        200..=299 => SendOutcome::Delivered,
        429 | 503 => {
            let structured = rate_limits.map(parse_rate_limits).unwrap_or_default();
            if !structured.is_empty() {
                return SendOutcome::RateLimited(structured);
            }

            let retry = retry_after.and_then(parse_retry_after);
            match (status, retry) {
                (503, None) => SendOutcome::NetworkFailure(format!("collector returned {status}")),
                (_, retry) => {
                    let retry = retry.unwrap_or(DEFAULT_RETRY_AFTER);
                    SendOutcome::RateLimited(per_category(categories, retry))
                }
            }
        }
        400..=499 => SendOutcome::ClientError(status),
        500..=599 => SendOutcome::NetworkFailure(format!("collector returned {status}")),
        other => SendOutcome::ClientError(other),
    }
}

/// One limit per batch category; wildcard when the batch carried no events
fn per_category(categories: &BTreeSet<Category>, retry_after: std::time::Duration) -> Vec<RateLimit> {
    if categories.is_empty() {
        return vec![RateLimit::all(retry_after)];
    }
    categories
        .iter()
        .map(|c| RateLimit {
            category: Some(c.clone()),
            retry_after,
        })
        .collect()
}
