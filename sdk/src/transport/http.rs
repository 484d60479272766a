//! HTTP transport for vigil-sdk
//!
//! POSTs sealed envelopes to the collector endpoint.
//!
//! # Example
//!
//! ```ignore
//! let transport = HttpTransport::new("https://collector.example.com/api/envelope")?
//!     .header("Authorization", "Bearer token123");
//! let pipeline = Pipeline::start(config, Arc::new(transport))?;
//! ```

use crate::envelope::{self, Envelope};
use crate::error::VigilError;
use crate::rate_limit::RATE_LIMITS_HEADER;
use crate::transport::{SendOutcome, Transport, classify_response};
use async_trait::async_trait;
use reqwest::{Client, Response};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default connection timeout in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

const USER_AGENT: &str = concat!("vigil-sdk/", env!("CARGO_PKG_VERSION"));

/// Bytes of a rejection body kept for the warn log
const MAX_LOGGED_BODY: usize = 1024;

/// HTTP transport - POSTs newline-delimited JSON envelopes
pub struct HttpTransport {
    client: Client,
    url: String,
    headers: HashMap<String, String>,
}

impl HttpTransport {
    /// Create a new HttpTransport for the given collector URL
    ///
    /// Uses default timeouts: 30s request timeout, 10s connection timeout
    ///
    /// # Errors
    /// Returns `VigilError::Transport` if the HTTP client cannot be created
    pub fn new(url: impl Into<String>) -> Result<Self, VigilError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| VigilError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            headers: HashMap::new(),
        })
    }

    /// Add a custom header to all requests
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Collector URL this transport posts to
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, envelope: &Envelope) -> SendOutcome {
        if envelope.is_empty() {
            return SendOutcome::Delivered;
        }

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, envelope::CONTENT_TYPE)
            .body(envelope.body().clone());

        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %self.url, error = %e, "collector connection failed");
                return SendOutcome::NetworkFailure(format!(
                    "failed to connect to {}: {e}",
                    self.url
                ));
            }
        };

        let status = response.status();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let retry_after = header(RETRY_AFTER.as_str());
        let rate_limits = header(RATE_LIMITS_HEADER);

        let outcome = classify_response(
            status.as_u16(),
            retry_after.as_deref(),
            rate_limits.as_deref(),
            &envelope.categories(),
        );

        match &outcome {
            SendOutcome::Delivered => debug!(
                url = %self.url,
                items = envelope.item_count(),
                status = %status,
                "envelope delivered"
            ),
            SendOutcome::ClientError(_) => {
                let (body, truncated) = read_body_prefix(response, MAX_LOGGED_BODY).await;
                warn!(
                    url = %self.url,
                    status = %status,
                    body = %body,
                    truncated,
                    "envelope rejected"
                );
            }
            SendOutcome::RateLimited(limits) => debug!(
                url = %self.url,
                status = %status,
                limits = limits.len(),
                "collector rate limited envelope"
            ),
            SendOutcome::NetworkFailure(_) => {
                debug!(url = %self.url, status = %status, "collector unavailable")
            }
        }

        outcome
    }
}

/// Read at most `limit` bytes of the response body
///
/// Returns the (lossily decoded) prefix and whether anything was cut off.
/// Stops reading as soon as the limit is reached.
async fn read_body_prefix(mut response: Response, limit: usize) -> (String, bool) {
    let mut buf = Vec::new();
    let mut truncated = false;

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let room = limit.saturating_sub(buf.len());
                if chunk.len() > room {
                    buf.extend_from_slice(&chunk[..room]);
                    truncated = true;
                    break;
                }
                buf.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "failed to read rejection body");
                break;
            }
        }
    }

    (String::from_utf8_lossy(&buf).into_owned(), truncated)
}
