//! Pipeline counters
//!
//! Every discard goes through [`Counters`], which keeps three views in step:
//! the per-reason totals returned by [`crate::Pipeline::stats`], the client
//! report tracker, and the Prometheus counters.

use crate::client_report::DiscardTracker;
use crate::error::DropReason;
use crate::event::Category;
use crate::metrics;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Events accepted into the queue
    pub captured: u64,
    /// Events the collector accepted
    pub sent: u64,
    /// Events currently waiting for delivery
    pub queued: usize,
    /// Breadcrumbs currently held in the ring
    pub breadcrumbs: usize,
    /// Discards by reason (events and breadcrumbs)
    pub dropped: BTreeMap<DropReason, u64>,
}

impl PipelineStats {
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.dropped.get(&reason).copied().unwrap_or(0)
    }

    pub fn total_dropped(&self) -> u64 {
        self.dropped.values().sum()
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    captured: AtomicU64,
    sent: AtomicU64,
    dropped: Mutex<BTreeMap<DropReason, u64>>,
    discards: DiscardTracker,
}

impl Counters {
    pub(crate) fn captured(&self, category: &Category) {
        self.captured.fetch_add(1, Ordering::Relaxed);
        metrics::try_record_captured(category.as_str());
    }

    pub(crate) fn sent(&self, count: u64) {
        self.sent.fetch_add(count, Ordering::Relaxed);
        metrics::try_record_sent(count);
    }

    /// Count discarded events; these also feed the client report
    pub(crate) fn event_dropped(&self, reason: DropReason, category: &Category, count: u64) {
        if count == 0 {
            return;
        }
        self.bump(reason, count);
        self.discards.record(reason, category, count);
    }

    /// Count a discarded breadcrumb
    pub(crate) fn breadcrumb_dropped(&self, reason: DropReason) {
        self.bump(reason, 1);
    }

    pub(crate) fn discards(&self) -> &DiscardTracker {
        &self.discards
    }

    pub(crate) fn snapshot(&self, queued: usize, breadcrumbs: usize) -> PipelineStats {
        PipelineStats {
            captured: self.captured.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            queued,
            breadcrumbs,
            dropped: self.dropped.lock().clone(),
        }
    }

    fn bump(&self, reason: DropReason, count: u64) {
        *self.dropped.lock().entry(reason).or_insert(0) += count;
        metrics::try_record_dropped(reason.as_str(), count);
    }
}
