//! Failed HTTP request capture
//!
//! An interceptor around the application's HTTP client reports every
//! completed exchange here. Each exchange leaves an `http` breadcrumb; the
//! ones whose status and URL match the configured filters are also captured
//! as error events.

use crate::Pipeline;
use crate::event::{Breadcrumb, Category, EventData, Level};
use crate::producers::{StatusMatcher, TargetMatcher};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::trace;

/// Header set as reported by the interceptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Headers {
    /// Raw `Name: value\r\n` block, as returned by `getAllResponseHeaders`-style APIs
    Raw(String),
    Map(BTreeMap<String, String>),
}

impl Headers {
    /// Normalize into a map; `None` when nothing usable is present
    pub fn to_map(&self) -> Option<BTreeMap<String, String>> {
        match self {
            Headers::Raw(raw) => parse_raw_headers(raw),
            Headers::Map(map) if !map.is_empty() => Some(map.clone()),
            Headers::Map(_) => None,
        }
    }
}

/// One completed HTTP request/response pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpExchange {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub request_headers: Option<Headers>,
    pub response_headers: Option<Headers>,
    /// Raw `Cookie` header value
    pub request_cookies: Option<String>,
    /// Raw `Set-Cookie` style value
    pub response_cookies: Option<String>,
    pub response_body_size: Option<u64>,
}

impl HttpExchange {
    pub fn new(method: impl Into<String>, url: impl Into<String>, status: u16) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            status,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFailuresOptions {
    /// Statuses that count as failures
    pub failed_request_status_codes: Vec<StatusMatcher>,
    /// URLs eligible for capture
    pub failed_request_targets: Vec<TargetMatcher>,
    /// Include headers and cookies in captured events
    pub send_default_pii: bool,
}

impl Default for HttpFailuresOptions {
    fn default() -> Self {
        Self {
            failed_request_status_codes: vec![StatusMatcher::Range(500, 599)],
            failed_request_targets: vec![TargetMatcher::literal("")],
            send_default_pii: false,
        }
    }
}

/// Records HTTP breadcrumbs and captures failed requests as error events
pub struct HttpFailures {
    pipeline: Pipeline,
    options: HttpFailuresOptions,
}

impl HttpFailures {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            options: HttpFailuresOptions::default(),
        }
    }

    pub fn with_options(mut self, options: HttpFailuresOptions) -> Self {
        self.options = options;
        self
    }

    /// Observe one exchange
    ///
    /// Returns the captured event id when the exchange was reported as a
    /// failure and the pipeline accepted it.
    pub fn observe(&self, exchange: HttpExchange) -> Option<String> {
        if exchange.url.is_empty() || self.is_collector_url(&exchange.url) {
            return None;
        }

        self.pipeline.add_breadcrumb(breadcrumb(&exchange));

        if !self.is_failure(&exchange) {
            return None;
        }

        trace!(url = %exchange.url, status = exchange.status, "capturing failed request");
        self.pipeline.capture(self.to_event(exchange))
    }

    fn is_collector_url(&self, url: &str) -> bool {
        self.pipeline
            .config()
            .endpoint
            .as_deref()
            .is_some_and(|endpoint| url.starts_with(endpoint))
    }

    fn is_failure(&self, exchange: &HttpExchange) -> bool {
        self.options
            .failed_request_status_codes
            .iter()
            .any(|m| m.matches(exchange.status))
            && self
                .options
                .failed_request_targets
                .iter()
                .any(|m| m.matches(&exchange.url))
    }

    fn to_event(&self, exchange: HttpExchange) -> EventData {
        let pii = self.options.send_default_pii;

        let mut request = Map::new();
        request.insert("method".into(), Value::String(exchange.method.clone()));
        request.insert("url".into(), Value::String(exchange.url.clone()));

        let mut response = Map::new();
        response.insert("status_code".into(), Value::from(exchange.status));
        if let Some(size) = exchange.response_body_size {
            response.insert("body_size".into(), Value::from(size));
        }

        if pii {
            if let Some(headers) = exchange.request_headers.as_ref().and_then(Headers::to_map) {
                request.insert("headers".into(), json!(headers));
            }
            if let Some(cookies) = exchange.request_cookies.as_deref().and_then(parse_cookies) {
                request.insert("cookies".into(), json!(cookies));
            }
            if let Some(headers) = exchange.response_headers.as_ref().and_then(Headers::to_map) {
                response.insert("headers".into(), json!(headers));
            }
            if let Some(cookies) = exchange.response_cookies.as_deref().and_then(parse_cookies) {
                response.insert("cookies".into(), json!(cookies));
            }
        }

        EventData::message(
            Category::Error,
            format!("HTTP Client Error with status code: {}", exchange.status),
        )
        .with_field("level", "error")
        .with_field("mechanism", json!({"type": "http.client", "handled": false}))
        .with_context("request", Value::Object(request))
        .with_context("response", Value::Object(response))
    }
}

fn breadcrumb(exchange: &HttpExchange) -> Breadcrumb {
    let level = match exchange.status {
        400..=499 => Level::Warning,
        500..=599 => Level::Error,
        _ => Level::Info,
    };
    Breadcrumb {
        ty: "http".to_string(),
        category: Some("http".to_string()),
        level,
        ..Default::default()
    }
    .with_data("method", exchange.method.clone())
    .with_data("url", exchange.url.clone())
    .with_data("status_code", exchange.status)
}

/// Parse a raw `Name: value` header block
///
/// Lines without a colon or with an empty name are skipped. Returns `None`
/// when no line is usable.
pub fn parse_raw_headers(raw: &str) -> Option<BTreeMap<String, String>> {
    let headers: BTreeMap<String, String> = raw
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect();
    (!headers.is_empty()).then_some(headers)
}

/// Parse a `a=1; b=2` cookie string
pub fn parse_cookies(raw: &str) -> Option<BTreeMap<String, String>> {
    let cookies: BTreeMap<String, String> = raw
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect();
    (!cookies.is_empty()).then_some(cookies)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::envelope::Envelope;
    use crate::transport::{SendOutcome, Transport};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        envelopes: Mutex<Vec<Envelope>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn send(&self, envelope: &Envelope) -> SendOutcome {
            self.envelopes.lock().push(envelope.clone());
            SendOutcome::Delivered
        }
    }

    fn setup(config: Config) -> (Pipeline, Arc<Recorder>) {
        let transport = Arc::new(Recorder::default());
        let pipeline = Pipeline::start(
            config.with_flush_interval(Duration::from_secs(3600)),
            transport.clone(),
        )
        .unwrap();
        (pipeline, transport)
    }

    async fn only_event(pipeline: &Pipeline, transport: &Recorder) -> Value {
        assert!(pipeline.flush(Duration::from_secs(1)).await);
        let envelopes = transport.envelopes.lock();
        let body = std::str::from_utf8(envelopes[0].body()).unwrap();
        serde_json::from_str(body.lines().nth(1).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_server_error_is_captured() {
        let (pipeline, transport) = setup(Config::default());
        let producer = HttpFailures::new(pipeline.clone());

        let mut exchange = HttpExchange::new("GET", "https://api.example.com/users", 503);
        exchange.response_body_size = Some(42);
        assert!(producer.observe(exchange).is_some());

        let event = only_event(&pipeline, &transport).await;
        assert_eq!(event["category"], "error");
        assert_eq!(
            event["payload"]["message"],
            "HTTP Client Error with status code: 503"
        );
        assert_eq!(event["contexts"]["request"]["method"], "GET");
        assert_eq!(event["contexts"]["response"]["status_code"], 503);
        assert_eq!(event["contexts"]["response"]["body_size"], 42);
        assert_eq!(event["breadcrumbs"][0]["type"], "http");
        assert_eq!(event["breadcrumbs"][0]["level"], "error");
    }

    #[tokio::test]
    async fn test_success_only_leaves_breadcrumb() {
        let (pipeline, _) = setup(Config::default());
        let producer = HttpFailures::new(pipeline.clone());

        assert!(
            producer
                .observe(HttpExchange::new("POST", "https://api.example.com/x", 201))
                .is_none()
        );
        assert_eq!(pipeline.queue_len(), 0);

        let crumbs = pipeline.breadcrumbs();
        assert_eq!(crumbs.len(), 1);
        assert_eq!(crumbs[0].data["status_code"], 201);
        assert_eq!(crumbs[0].level, Level::Info);
    }

    #[tokio::test]
    async fn test_status_and_target_filters() {
        let (pipeline, _) = setup(Config::default());
        let producer = HttpFailures::new(pipeline.clone()).with_options(HttpFailuresOptions {
            failed_request_status_codes: vec![StatusMatcher::Exact(404), StatusMatcher::Range(500, 599)],
            failed_request_targets: vec![TargetMatcher::pattern(r"^https://api\.").unwrap()],
            send_default_pii: false,
        });

        assert!(producer.observe(HttpExchange::new("GET", "https://api.x.io/a", 404)).is_some());
        assert!(producer.observe(HttpExchange::new("GET", "https://api.x.io/a", 403)).is_none());
        assert!(producer.observe(HttpExchange::new("GET", "https://cdn.x.io/a", 500)).is_none());
        assert_eq!(pipeline.queue_len(), 1);
        assert_eq!(pipeline.breadcrumbs()[1].level, Level::Warning);
    }

    #[tokio::test]
    async fn test_collector_requests_are_ignored() {
        let (pipeline, _) = setup(Config::default().with_endpoint("https://collector.example.com/api"));
        let producer = HttpFailures::new(pipeline.clone());

        let exchange = HttpExchange::new("POST", "https://collector.example.com/api/envelope", 500);
        assert!(producer.observe(exchange).is_none());
        assert!(pipeline.breadcrumbs().is_empty());
        assert_eq!(pipeline.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_headers_and_cookies_only_with_pii() {
        let exchange = HttpExchange {
            request_headers: Some(Headers::Raw("Accept: application/json\r\nX-Trace: 1\r\n".into())),
            response_headers: Some(Headers::Map(BTreeMap::from([(
                "content-type".to_string(),
                "text/html".to_string(),
            )]))),
            request_cookies: Some("session=abc; theme=dark".into()),
            ..HttpExchange::new("GET", "https://api.example.com/me", 500)
        };

        let (pipeline, transport) = setup(Config::default());
        HttpFailures::new(pipeline.clone()).observe(exchange.clone());
        let event = only_event(&pipeline, &transport).await;
        assert!(event["contexts"]["request"].get("headers").is_none());
        assert!(event["contexts"]["request"].get("cookies").is_none());

        let (pipeline, transport) = setup(Config::default());
        HttpFailures::new(pipeline.clone())
            .with_options(HttpFailuresOptions {
                send_default_pii: true,
                ..Default::default()
            })
            .observe(exchange);
        let event = only_event(&pipeline, &transport).await;
        assert_eq!(event["contexts"]["request"]["headers"]["accept"], "application/json");
        assert_eq!(event["contexts"]["request"]["cookies"]["theme"], "dark");
        assert_eq!(event["contexts"]["response"]["headers"]["content-type"], "text/html");
        assert!(event["contexts"]["response"].get("cookies").is_none());
    }

    #[test]
    fn test_parse_raw_headers() {
        let parsed = parse_raw_headers("Content-Type: text/plain\r\nbroken line\r\n: novalue\r\nX-A: b:c\r\n").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["content-type"], "text/plain");
        assert_eq!(parsed["x-a"], "b:c");

        assert!(parse_raw_headers("").is_none());
        assert!(parse_raw_headers("garbage").is_none());
    }

    #[test]
    fn test_parse_cookies() {
        let parsed = parse_cookies("a=1; b = 2 ;junk").unwrap();
        assert_eq!(parsed["a"], "1");
        assert_eq!(parsed["b"], "2");
        assert!(parse_cookies(";;").is_none());
    }
}
