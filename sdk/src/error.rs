//! Error types for vigil-sdk
//!
//! Errors only surface from setup paths (config, client construction, metrics).
//! The producer-facing API never returns them: every runtime failure becomes a
//! [`DropReason`] that is counted and logged.

use thiserror::Error;

/// Result type alias for vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;

/// Main error type for vigil-sdk
#[derive(Error, Debug)]
pub enum VigilError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP client could not be built
    #[error("transport error: {0}")]
    Transport(String),

    /// Envelope or event could not be encoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Background tasks need a tokio runtime
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Why an event or breadcrumb never reached the collector
///
/// The string form doubles as the `reason` label for metrics and client reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DropReason {
    /// Category suppressed by a collector rate limit
    RateLimited,
    /// Outbound queue was at capacity
    QueueFull,
    /// Network failures exceeded `max_retries`
    RetryExhausted,
    /// Collector rejected the batch with a non-retryable 4xx
    ClientError,
    /// `before_breadcrumb` returned `None`
    BeforeBreadcrumb,
    /// A user callback panicked
    CallbackPanic,
    /// Envelope encoding failed or the transport panicked
    Internal,
    /// Still queued when the shutdown timeout elapsed
    Shutdown,
}

impl DropReason {
    /// Stable snake_case label
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::RateLimited => "ratelimit_backoff",
            DropReason::QueueFull => "queue_overflow",
            DropReason::RetryExhausted => "network_error",
            DropReason::ClientError => "send_error",
            DropReason::BeforeBreadcrumb => "before_breadcrumb",
            DropReason::CallbackPanic => "callback_panic",
            DropReason::Internal => "internal_sdk_error",
            DropReason::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_error_converts() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: VigilError = bad.into();
        assert!(matches!(err, VigilError::Serialization(_)));
        assert!(err.to_string().starts_with("serialization error"));
    }

    #[test]
    fn test_drop_reason_labels_are_distinct() {
        let all = [
            DropReason::RateLimited,
            DropReason::QueueFull,
            DropReason::RetryExhausted,
            DropReason::ClientError,
            DropReason::BeforeBreadcrumb,
            DropReason::CallbackPanic,
            DropReason::Internal,
            DropReason::Shutdown,
        ];
        let labels: std::collections::HashSet<_> = all.iter().map(DropReason::as_str).collect();
        assert_eq!(labels.len(), all.len());
        assert_eq!(DropReason::QueueFull.to_string(), "queue_overflow");
    }
}
