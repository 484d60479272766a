//! Integration tests for the delivery pipeline
//!
//! These tests drive a real `Pipeline` through its public API with scripted
//! transports and verify retry, rate-limit, shutdown and producer behavior
//! end to end.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use vigil_sdk::clock::MockClock;
use vigil_sdk::envelope::Envelope;
use vigil_sdk::producers::{DomBreadcrumbs, DomEvent, HttpExchange, HttpFailures};
use vigil_sdk::rate_limit::MAX_RETRY_AFTER;
use vigil_sdk::transport::classify_response;
use vigil_sdk::{
    Category, Config, DropReason, EventData, Pipeline, RateLimit, SendOutcome, Transport,
};

// ============================================================================
// Test Transports
// ============================================================================

/// Transport that fails a configurable number of times then succeeds
struct FailNTimesTransport {
    failures_remaining: AtomicU32,
    send_count: AtomicU64,
}

impl FailNTimesTransport {
    fn new(fail_count: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(fail_count),
            send_count: AtomicU64::new(0),
        }
    }

    fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FailNTimesTransport {
    fn name(&self) -> &'static str {
        "fail_n_times"
    }

    async fn send(&self, _envelope: &Envelope) -> SendOutcome {
        self.send_count.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            SendOutcome::NetworkFailure("simulated failure".into())
        } else {
            SendOutcome::Delivered
        }
    }
}

/// Transport that rate limits the first batch, then records everything
struct RateLimitOnceTransport {
    limits: Mutex<Option<Vec<RateLimit>>>,
    delivered: Mutex<Vec<Envelope>>,
}

impl RateLimitOnceTransport {
    fn new(limits: Vec<RateLimit>) -> Self {
        Self {
            limits: Mutex::new(Some(limits)),
            delivered: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Transport for RateLimitOnceTransport {
    fn name(&self) -> &'static str {
        "rate_limit_once"
    }

    async fn send(&self, envelope: &Envelope) -> SendOutcome {
        if let Some(limits) = self.limits.lock().take() {
            return SendOutcome::RateLimited(limits);
        }
        self.delivered.lock().push(envelope.clone());
        SendOutcome::Delivered
    }
}

/// Transport that records every envelope
#[derive(Default)]
struct TrackingTransport {
    delivered: Mutex<Vec<Envelope>>,
}

impl TrackingTransport {
    fn messages(&self) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .flat_map(|env| env.events().to_vec())
            .map(|e| e.payload["message"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl Transport for TrackingTransport {
    fn name(&self) -> &'static str {
        "tracking"
    }

    async fn send(&self, envelope: &Envelope) -> SendOutcome {
        self.delivered.lock().push(envelope.clone());
        SendOutcome::Delivered
    }
}

/// Transport that answers the first batch with a raw collector response,
/// then delivers everything
struct CollectorReplyTransport {
    reply: Mutex<Option<(u16, Option<&'static str>, Option<&'static str>)>>,
    delivered: TrackingTransport,
}

impl CollectorReplyTransport {
    fn new(status: u16, retry_after: Option<&'static str>, rate_limits: Option<&'static str>) -> Self {
        Self {
            reply: Mutex::new(Some((status, retry_after, rate_limits))),
            delivered: TrackingTransport::default(),
        }
    }
}

#[async_trait]
impl Transport for CollectorReplyTransport {
    fn name(&self) -> &'static str {
        "collector_reply"
    }

    async fn send(&self, envelope: &Envelope) -> SendOutcome {
        let reply = self.reply.lock().take();
        match reply {
            Some((status, retry_after, rate_limits)) => {
                classify_response(status, retry_after, rate_limits, &envelope.categories())
            }
            None => self.delivered.send(envelope).await,
        }
    }
}

/// Transport whose first send panics
#[derive(Default)]
struct PanickingTransport {
    panicked: AtomicBool,
    delivered: TrackingTransport,
}

#[async_trait]
impl Transport for PanickingTransport {
    fn name(&self) -> &'static str {
        "panicking"
    }

    #[allow(clippy::panic)]
    async fn send(&self, envelope: &Envelope) -> SendOutcome {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("transport bug");
        }
        self.delivered.send(envelope).await
    }
}

/// Transport whose sends never complete
struct HangingTransport;

#[async_trait]
impl Transport for HangingTransport {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn send(&self, _envelope: &Envelope) -> SendOutcome {
        std::future::pending().await
    }
}

fn quiet() -> Config {
    Config::default().with_flush_interval(Duration::from_secs(3600))
}

// ============================================================================
// Retry Behavior
// ============================================================================

#[tokio::test]
async fn test_transient_failures_recover_within_retry_budget() {
    let transport = Arc::new(FailNTimesTransport::new(2));
    let pipeline = Pipeline::start(quiet().with_max_retries(3), transport.clone()).unwrap();

    pipeline.capture(EventData::message("error", "flaky network"));

    assert!(!pipeline.flush(Duration::from_secs(1)).await);
    assert!(!pipeline.flush(Duration::from_secs(1)).await);
    assert!(pipeline.flush(Duration::from_secs(1)).await);

    let stats = pipeline.stats();
    assert_eq!(transport.send_count(), 3);
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.total_dropped(), 0);
}

#[tokio::test]
async fn test_event_dropped_after_max_retries() {
    let transport = Arc::new(FailNTimesTransport::new(u32::MAX));
    let pipeline = Pipeline::start(quiet().with_max_retries(3), transport.clone()).unwrap();

    pipeline.capture(EventData::message("error", "never arrives"));
    for _ in 0..3 {
        pipeline.flush(Duration::from_secs(1)).await;
    }

    assert_eq!(pipeline.queue_len(), 0);
    assert_eq!(transport.send_count(), 3);
    assert_eq!(pipeline.stats().dropped(DropReason::RetryExhausted), 1);

    // nothing left to send
    pipeline.flush(Duration::from_secs(1)).await;
    assert_eq!(transport.send_count(), 3);
}

// ============================================================================
// Rate Limits
// ============================================================================

#[tokio::test]
async fn test_collector_rate_limit_blocks_category_until_expiry() {
    let clock = MockClock::new();
    let transport = Arc::new(RateLimitOnceTransport::new(vec![RateLimit::new(
        "error",
        Duration::from_secs(60),
    )]));
    let pipeline =
        Pipeline::start_with_clock(quiet(), transport.clone(), Arc::new(clock.clone())).unwrap();

    pipeline.capture(EventData::message("error", "first"));
    pipeline.flush(Duration::from_secs(1)).await;

    assert!(pipeline.rate_limiter().is_limited(&Category::Error));
    assert!(pipeline.capture(EventData::message("error", "blocked")).is_none());
    assert_eq!(pipeline.queue_len(), 0);
    assert!(pipeline.capture(EventData::message("transaction", "other")).is_some());

    clock.advance(Duration::from_secs(61));
    assert!(!pipeline.rate_limiter().is_limited(&Category::Error));
    assert!(pipeline.capture(EventData::message("error", "after")).is_some());

    assert!(pipeline.flush(Duration::from_secs(1)).await);
    assert_eq!(transport.delivered.lock()[0].events().len(), 2);
    assert_eq!(pipeline.stats().dropped(DropReason::RateLimited), 2);
}

#[tokio::test]
async fn test_rate_limit_expires_after_retry_after() {
    let clock = MockClock::new();
    let pipeline = Pipeline::start_with_clock(
        quiet(),
        Arc::new(TrackingTransport::default()),
        Arc::new(clock.clone()),
    )
    .unwrap();

    pipeline
        .rate_limiter()
        .apply(&[RateLimit::new("error", Duration::from_secs(120))]);

    clock.advance(Duration::from_secs(119));
    assert!(pipeline.rate_limiter().is_limited(&Category::Error));
    clock.advance(Duration::from_secs(2));
    assert!(!pipeline.rate_limiter().is_limited(&Category::Error));
}

#[tokio::test]
async fn test_wildcard_limit_blocks_every_category() {
    let pipeline = Pipeline::start(quiet(), Arc::new(TrackingTransport::default())).unwrap();
    pipeline
        .rate_limiter()
        .apply(&[RateLimit::all(Duration::from_secs(30))]);

    assert!(pipeline.capture(EventData::message("error", "a")).is_none());
    assert!(pipeline.capture(EventData::message("session", "b")).is_none());
}

#[tokio::test]
async fn test_hostile_rate_limit_headers_do_not_stall_delivery() {
    let replies = [
        (429, Some("10000000000000000000"), None),
        (429, Some("1e20"), None),
        (429, Some("inf"), None),
        (429, Some("-5"), None),
        (429, Some("Wed, 21 Oct 2015 07:28:00 GMT"), None),
        (429, None, Some("99999999999999999999999:error:org")),
        (503, Some("1e300"), None),
    ];

    for (status, retry_after, rate_limits) in replies {
        let clock = MockClock::new();
        let transport = Arc::new(CollectorReplyTransport::new(status, retry_after, rate_limits));
        let pipeline =
            Pipeline::start_with_clock(quiet(), transport.clone(), Arc::new(clock.clone()))
                .unwrap();

        pipeline.capture(EventData::message("error", "limited"));
        assert!(
            pipeline.flush(Duration::from_secs(1)).await,
            "first flush after {retry_after:?} / {rate_limits:?}"
        );
        assert!(pipeline.rate_limiter().is_limited(&Category::Error));
        assert_eq!(pipeline.stats().dropped(DropReason::RateLimited), 1);

        pipeline.capture(EventData::message("session", "after"));
        assert!(pipeline.flush(Duration::from_secs(1)).await);
        assert_eq!(transport.delivered.messages(), vec!["after"]);

        clock.advance(MAX_RETRY_AFTER);
        assert!(!pipeline.rate_limiter().is_limited(&Category::Error));
    }
}

#[tokio::test]
async fn test_panicking_transport_does_not_wedge_pipeline() {
    let transport = Arc::new(PanickingTransport::default());
    let pipeline = Pipeline::start(quiet(), transport.clone()).unwrap();

    pipeline.capture(EventData::message("error", "lost"));
    assert!(pipeline.flush(Duration::from_secs(1)).await);
    assert_eq!(pipeline.stats().dropped(DropReason::Internal), 1);

    pipeline.capture(EventData::message("error", "kept"));
    assert!(pipeline.flush(Duration::from_secs(1)).await);
    assert_eq!(transport.delivered.messages(), vec!["kept"]);
    pipeline.shutdown().await;
}

// ============================================================================
// Queue & Ordering
// ============================================================================

#[tokio::test]
async fn test_delivery_preserves_capture_order() {
    let transport = Arc::new(TrackingTransport::default());
    let pipeline = Pipeline::start(
        quiet().with_max_queue_size(100).with_flush_threshold(100),
        transport.clone(),
    )
    .unwrap();

    let expected: Vec<String> = (0..20).map(|i| format!("event-{i}")).collect();
    for msg in &expected {
        pipeline.capture(EventData::message("error", msg.clone()));
    }

    assert!(pipeline.flush(Duration::from_secs(1)).await);
    assert_eq!(transport.messages(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_get_unique_ids() {
    let transport = Arc::new(TrackingTransport::default());
    let pipeline = Pipeline::start(
        quiet().with_max_queue_size(1000).with_flush_threshold(1000),
        transport.clone(),
    )
    .unwrap();

    let tasks: Vec<_> = (0..10)
        .map(|p| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                (0..25)
                    .filter_map(|i| pipeline.capture(EventData::message("error", format!("{p}:{i}"))))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.extend(task.await.unwrap());
    }
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(ids.len(), 250);
    assert_eq!(unique.len(), 250);

    assert!(pipeline.flush(Duration::from_secs(2)).await);
    assert_eq!(transport.messages().len(), 250);
}

#[tokio::test]
async fn test_overflow_is_reported_in_next_envelope() {
    let transport = Arc::new(TrackingTransport::default());
    let pipeline = Pipeline::start(
        quiet().with_max_queue_size(1).with_flush_threshold(10),
        transport.clone(),
    )
    .unwrap();

    assert!(pipeline.capture(EventData::message("error", "kept")).is_some());
    assert!(pipeline.capture(EventData::message("error", "lost")).is_none());
    assert!(pipeline.flush(Duration::from_secs(1)).await);

    let delivered = transport.delivered.lock();
    let report = delivered[0].client_report().expect("client report");
    assert_eq!(report.discarded_events.len(), 1);
    assert_eq!(report.discarded_events[0].reason, "queue_overflow");
    assert_eq!(report.discarded_events[0].category, Category::Error);
    assert_eq!(report.discarded_events[0].quantity, 1);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_is_bounded_by_timeout() {
    let pipeline = Pipeline::start(
        quiet()
            .with_max_batch_size(1)
            .with_shutdown_timeout(Duration::from_millis(100)),
        Arc::new(HangingTransport),
    )
    .unwrap();
    let handle = pipeline.clone();

    pipeline.capture(EventData::message("error", "in flight"));
    pipeline.capture(EventData::message("error", "still queued"));

    tokio::time::timeout(Duration::from_secs(2), pipeline.shutdown())
        .await
        .expect("shutdown must not hang");

    assert_eq!(handle.queue_len(), 0);
    assert_eq!(handle.stats().dropped(DropReason::Shutdown), 1);
}

#[tokio::test]
async fn test_shutdown_delivers_pending_events() {
    let transport = Arc::new(TrackingTransport::default());
    let pipeline = Pipeline::start(quiet(), transport.clone()).unwrap();

    pipeline.capture(EventData::message("error", "a"));
    pipeline.capture(EventData::message("error", "b"));
    pipeline.shutdown().await;

    assert_eq!(transport.messages(), vec!["a", "b"]);
}

// ============================================================================
// Producers
// ============================================================================

#[tokio::test]
async fn test_failed_request_carries_ui_breadcrumbs() {
    let transport = Arc::new(TrackingTransport::default());
    let pipeline = Pipeline::start(quiet(), transport.clone()).unwrap();
    let dom = DomBreadcrumbs::new(pipeline.clone());
    let http = HttpFailures::new(pipeline.clone());

    dom.record(DomEvent::new("click", "form#checkout > button.pay"));
    let id = http
        .observe(HttpExchange::new("POST", "https://shop.example.com/api/pay", 502))
        .expect("failure captured");

    assert!(pipeline.flush(Duration::from_secs(1)).await);
    let delivered = transport.delivered.lock();
    let event = &delivered[0].events()[0];
    assert_eq!(event.id, id);
    assert_eq!(event.category, Category::Error);

    let categories: Vec<_> = event
        .attachments
        .breadcrumbs
        .iter()
        .filter_map(|b| b.category.as_deref())
        .collect();
    assert_eq!(categories, vec!["ui.click", "http"]);
}
