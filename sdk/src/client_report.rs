//! Client reports: counts of events the SDK discarded
//!
//! Drops are silent for producers, but the collector still learns about them.
//! The pipeline records every discard here and the flush path attaches the
//! accumulated counts to the next outgoing envelope.

use crate::error::DropReason;
use crate::event::Category;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One `(reason, category)` counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscardedEvents {
    pub reason: String,
    pub category: Category,
    pub quantity: u64,
}

/// Envelope item summarizing discarded events since the last report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientReport {
    pub timestamp: DateTime<Utc>,
    pub discarded_events: Vec<DiscardedEvents>,
}

/// Thread-safe accumulator of discard counts
#[derive(Default)]
pub struct DiscardTracker {
    counts: Mutex<BTreeMap<(DropReason, Category), u64>>,
}

impl DiscardTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, reason: DropReason, category: &Category, quantity: u64) {
        if quantity == 0 {
            return;
        }
        *self
            .counts
            .lock()
            .entry((reason, category.clone()))
            .or_insert(0) += quantity;
    }

    /// Take the accumulated counts as a report, resetting them
    pub fn take_report(&self) -> Option<ClientReport> {
        let counts = std::mem::take(&mut *self.counts.lock());
        if counts.is_empty() {
            return None;
        }

        Some(ClientReport {
            timestamp: Utc::now(),
            discarded_events: counts
                .into_iter()
                .map(|((reason, category), quantity)| DiscardedEvents {
                    reason: reason.as_str().to_string(),
                    category,
                    quantity,
                })
                .collect(),
        })
    }

    /// Put a report's counts back, e.g. when its envelope never went out
    pub fn restore(&self, report: ClientReport) {
        let mut counts = self.counts.lock();
        for item in report.discarded_events {
            if let Some(reason) = reason_from_str(&item.reason) {
                *counts.entry((reason, item.category)).or_insert(0) += item.quantity;
            }
        }
    }

    /// Count recorded for one key, for inspection
    pub fn count(&self, reason: DropReason, category: &Category) -> u64 {
        self.counts
            .lock()
            .get(&(reason, category.clone()))
            .copied()
            .unwrap_or(0)
    }
}

fn reason_from_str(s: &str) -> Option<DropReason> {
    [
        DropReason::RateLimited,
        DropReason::QueueFull,
        DropReason::RetryExhausted,
        DropReason::ClientError,
        DropReason::BeforeBreadcrumb,
        DropReason::CallbackPanic,
        DropReason::Internal,
        DropReason::Shutdown,
    ]
    .into_iter()
    .find(|r| r.as_str() == s)
}
