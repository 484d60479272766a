//! Configuration for the vigil pipeline

use crate::error::{Result, VigilError};
use crate::event::Breadcrumb;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Hook applied to every breadcrumb before it enters the ring
///
/// Returning `None` vetoes the breadcrumb.
pub type BeforeBreadcrumb = Arc<dyn Fn(Breadcrumb) -> Option<Breadcrumb> + Send + Sync>;

/// Main configuration for a [`crate::Pipeline`]
#[derive(Clone)]
pub struct Config {
    /// Breadcrumb ring capacity (0 disables breadcrumbs)
    pub max_breadcrumbs: usize,

    /// Maximum events waiting for delivery
    pub max_queue_size: usize,

    /// Periodic flush interval
    pub flush_interval: Duration,

    /// Failed delivery attempts before an event is dropped
    pub max_retries: u32,

    /// Breadcrumb filter/transform hook
    pub before_breadcrumb: Option<BeforeBreadcrumb>,

    /// Upper bound on the final drain at shutdown
    pub shutdown_timeout: Duration,

    /// Collector URL; `None` means the caller supplies its own transport
    pub endpoint: Option<String>,

    /// Queue length that triggers an early flush
    pub flush_threshold: usize,

    /// Maximum events per envelope (`None` = whole queue)
    pub max_batch_size: Option<usize>,

    /// First backoff window after a transient failure
    pub retry_backoff_initial: Duration,

    /// Backoff ceiling
    pub retry_backoff_max: Duration,

    /// Attach discard counts to outgoing envelopes
    pub send_client_reports: bool,

    /// Log level
    pub log_level: String,

    /// Log format (json or pretty)
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_breadcrumbs: 100,
            max_queue_size: 30,
            flush_interval: Duration::from_millis(5000),
            max_retries: 3,
            before_breadcrumb: None,
            shutdown_timeout: Duration::from_millis(2000),
            endpoint: None,
            flush_threshold: 10,
            max_batch_size: None,
            retry_backoff_initial: Duration::from_secs(1),
            retry_backoff_max: Duration::from_secs(30),
            send_client_reports: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("max_breadcrumbs", &self.max_breadcrumbs)
            .field("max_queue_size", &self.max_queue_size)
            .field("flush_interval", &self.flush_interval)
            .field("max_retries", &self.max_retries)
            .field("before_breadcrumb", &self.before_breadcrumb.is_some())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("endpoint", &self.endpoint)
            .field("flush_threshold", &self.flush_threshold)
            .field("max_batch_size", &self.max_batch_size)
            .field("retry_backoff_initial", &self.retry_backoff_initial)
            .field("retry_backoff_max", &self.retry_backoff_max)
            .field("send_client_reports", &self.send_client_reports)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Config {
    /// Load configuration from `VIGIL_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(endpoint) = get("VIGIL_ENDPOINT")
            && !endpoint.trim().is_empty()
        {
            config.endpoint = Some(endpoint.trim().to_string());
        }
        if let Some(v) = get("VIGIL_MAX_BREADCRUMBS") {
            config.max_breadcrumbs = parse_var("VIGIL_MAX_BREADCRUMBS", &v)?;
        }
        if let Some(v) = get("VIGIL_MAX_QUEUE_SIZE") {
            config.max_queue_size = parse_var("VIGIL_MAX_QUEUE_SIZE", &v)?;
        }
        if let Some(v) = get("VIGIL_FLUSH_INTERVAL_MS") {
            config.flush_interval =
                Duration::from_millis(parse_var("VIGIL_FLUSH_INTERVAL_MS", &v)?);
        }
        if let Some(v) = get("VIGIL_FLUSH_THRESHOLD") {
            config.flush_threshold = parse_var("VIGIL_FLUSH_THRESHOLD", &v)?;
        }
        if let Some(v) = get("VIGIL_MAX_BATCH_SIZE") {
            let size: usize = parse_var("VIGIL_MAX_BATCH_SIZE", &v)?;
            config.max_batch_size = (size > 0).then_some(size);
        }
        if let Some(v) = get("VIGIL_MAX_RETRIES") {
            config.max_retries = parse_var("VIGIL_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("VIGIL_SHUTDOWN_TIMEOUT_MS") {
            config.shutdown_timeout =
                Duration::from_millis(parse_var("VIGIL_SHUTDOWN_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("VIGIL_SEND_CLIENT_REPORTS") {
            config.send_client_reports = match v.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(VigilError::Config(format!(
                        "invalid VIGIL_SEND_CLIENT_REPORTS: {other} (expected true or false)"
                    )));
                }
            };
        }
        if let Some(level) = get("VIGIL_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(format) = get("VIGIL_LOG_FORMAT") {
            config.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(VigilError::Config(format!(
                        "invalid VIGIL_LOG_FORMAT: {other} (expected 'json' or 'pretty')"
                    )));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(VigilError::Config(
                "max_queue_size must be greater than 0".to_string(),
            ));
        }
        if self.flush_threshold == 0 {
            return Err(VigilError::Config(
                "flush_threshold must be greater than 0".to_string(),
            ));
        }
        if self.max_batch_size == Some(0) {
            return Err(VigilError::Config(
                "max_batch_size must be greater than 0 when set".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(VigilError::Config(
                "flush_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_breadcrumbs(mut self, n: usize) -> Self {
        self.max_breadcrumbs = n;
        self
    }

    pub fn with_max_queue_size(mut self, n: usize) -> Self {
        self.max_queue_size = n;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_flush_threshold(mut self, n: usize) -> Self {
        self.flush_threshold = n;
        self
    }

    pub fn with_max_batch_size(mut self, n: usize) -> Self {
        self.max_batch_size = Some(n);
        self
    }

    pub fn with_retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_backoff_initial = initial;
        self.retry_backoff_max = max;
        self
    }

    pub fn with_client_reports(mut self, enabled: bool) -> Self {
        self.send_client_reports = enabled;
        self
    }

    /// Install a breadcrumb hook
    ///
    /// ```
    /// use vigil_sdk::Config;
    ///
    /// let config = Config::default().before_breadcrumb(|crumb| {
    ///     (crumb.category.as_deref() != Some("console")).then_some(crumb)
    /// });
    /// assert!(config.before_breadcrumb.is_some());
    /// ```
    pub fn before_breadcrumb<F>(mut self, f: F) -> Self
    where
        F: Fn(Breadcrumb) -> Option<Breadcrumb> + Send + Sync + 'static,
    {
        self.before_breadcrumb = Some(Arc::new(f));
        self
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| VigilError::Config(format!("invalid {name}: {e}")))
}
