//! Prometheus metrics for vigil-sdk
//!
//! Registration is opt-in: until [`Metrics::init`] is called every
//! `try_record_*` helper is a no-op, so embedding applications that do not
//! scrape pay nothing.

use crate::error::{Result, VigilError};
use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, IntCounter, TextEncoder, register_counter_vec,
    register_gauge, register_histogram, register_int_counter,
};
use std::sync::OnceLock;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// All pipeline metrics
pub struct Metrics {
    /// Events accepted by `capture` (by category)
    pub events_captured: CounterVec,

    /// Events the collector accepted
    pub events_sent: IntCounter,

    /// Events discarded (by reason)
    pub events_dropped: CounterVec,

    /// Current queue length
    pub queue_size: Gauge,

    /// Time spent in one flush pass
    pub flush_latency: Histogram,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Returns error if metric registration fails.
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            events_captured: register_counter_vec!(
                "vigil_events_captured_total",
                "Total events accepted into the queue",
                &["category"]
            )
            .map_err(|e| VigilError::Metrics(format!("events_captured: {e}")))?,

            events_sent: register_int_counter!(
                "vigil_events_sent_total",
                "Total events delivered to the collector"
            )
            .map_err(|e| VigilError::Metrics(format!("events_sent: {e}")))?,

            events_dropped: register_counter_vec!(
                "vigil_events_dropped_total",
                "Total events discarded",
                &["reason"]
            )
            .map_err(|e| VigilError::Metrics(format!("events_dropped: {e}")))?,

            queue_size: register_gauge!("vigil_queue_size", "Events waiting for delivery")
                .map_err(|e| VigilError::Metrics(format!("queue_size: {e}")))?,

            flush_latency: register_histogram!(
                "vigil_flush_latency_seconds",
                "Duration of one flush pass",
                vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
            )
            .map_err(|e| VigilError::Metrics(format!("flush_latency: {e}")))?,
        };

        // Set the metrics (only succeeds once)
        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| VigilError::Metrics("Failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    pub fn record_captured(&self, category: &str) {
        self.events_captured.with_label_values(&[category]).inc();
    }

    pub fn record_sent(&self, count: u64) {
        self.events_sent.inc_by(count);
    }

    pub fn record_dropped(&self, reason: &str, count: u64) {
        self.events_dropped
            .with_label_values(&[reason])
            .inc_by(count as f64);
    }

    pub fn set_queue_size(&self, size: usize) {
        self.queue_size.set(size as f64);
    }

    pub fn record_flush_latency(&self, seconds: f64) {
        self.flush_latency.observe(seconds);
    }
}

/// Gather all metrics and encode as Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}

pub fn try_record_captured(category: &str) {
    if let Some(m) = Metrics::get() {
        m.record_captured(category);
    }
}

pub fn try_record_sent(count: u64) {
    if let Some(m) = Metrics::get() {
        m.record_sent(count);
    }
}

pub fn try_record_dropped(reason: &str, count: u64) {
    if let Some(m) = Metrics::get() {
        m.record_dropped(reason, count);
    }
}

pub fn try_set_queue_size(size: usize) {
    if let Some(m) = Metrics::get() {
        m.set_queue_size(size);
    }
}

pub fn try_record_flush_latency(seconds: f64) {
    if let Some(m) = Metrics::get() {
        m.record_flush_latency(seconds);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init_and_gather() {
        let metrics = Metrics::init().unwrap();
        // Second init returns the same instance instead of re-registering
        assert!(std::ptr::eq(metrics, Metrics::init().unwrap()));

        try_record_captured("error");
        try_record_sent(2);
        try_record_dropped("queue_overflow", 1);
        try_set_queue_size(7);
        try_record_flush_latency(0.01);

        let text = gather();
        assert!(text.contains("vigil_events_captured_total"));
        assert!(text.contains("vigil_events_dropped_total"));
        assert!(text.contains("vigil_queue_size"));
    }
}
