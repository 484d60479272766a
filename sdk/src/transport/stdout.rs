//! Stdout transport for debugging
//!
//! Prints each envelope instead of sending it. Useful for development and for
//! the `vigil-pipe` binary when no collector endpoint is configured.

use crate::envelope::Envelope;
use crate::transport::{SendOutcome, Transport};
use async_trait::async_trait;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stdout transport - always reports delivery
pub struct StdoutTransport {
    /// Print a human-readable summary instead of the raw body
    pretty: bool,
    /// Count of envelopes printed
    sent_count: AtomicU64,
}

impl StdoutTransport {
    /// Print raw NDJSON envelope bodies
    pub fn new() -> Self {
        Self {
            pretty: false,
            sent_count: AtomicU64::new(0),
        }
    }

    /// Print one summary line per event
    pub fn pretty() -> Self {
        Self {
            pretty: true,
            sent_count: AtomicU64::new(0),
        }
    }

    /// Get total envelopes printed
    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::Relaxed)
    }

    fn write_to(&self, out: &mut impl Write, envelope: &Envelope) -> std::io::Result<()> {
        if !self.pretty {
            return out.write_all(envelope.body());
        }

        writeln!(
            out,
            "┌─ Envelope ({} items, sent {}) ─────────────────",
            envelope.item_count(),
            envelope.sent_at().to_rfc3339()
        )?;
        for event in envelope.events() {
            let message = event
                .payload
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("-");
            writeln!(
                out,
                "│ [{}] {} {} ({} breadcrumbs)",
                event.category,
                event.id,
                message,
                event.attachments.breadcrumbs.len()
            )?;
        }
        if let Some(report) = envelope.client_report() {
            for d in &report.discarded_events {
                writeln!(out, "│ discarded {} {} x{}", d.reason, d.category, d.quantity)?;
            }
        }
        writeln!(out, "└─────────────────────────────────────────────────")
    }
}

impl Default for StdoutTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdoutTransport {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn send(&self, envelope: &Envelope) -> SendOutcome {
        let mut stdout = std::io::stdout().lock();
        self.write_to(&mut stdout, envelope).ok();
        self.sent_count.fetch_add(1, Ordering::Relaxed);
        SendOutcome::Delivered
    }
}
