//! Bounded outbound event queue
//!
//! Unlike the breadcrumb ring, the queue never evicts: when full, new events
//! are rejected and the caller counts them as dropped.

use crate::clock::{Clock, SystemClock};
use crate::event::Event;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// An event waiting for delivery
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub event: Arc<Event>,
    pub enqueued_at: Instant,
    /// Failed delivery attempts so far
    pub retry_count: u32,
}

impl QueueEntry {
    pub fn new(event: Arc<Event>, enqueued_at: Instant) -> Self {
        Self {
            event,
            enqueued_at,
            retry_count: 0,
        }
    }

    /// Time spent waiting for delivery as of `now`
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }
}

/// Counters for queue monitoring
#[derive(Default)]
struct QueueMetrics {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    drained: AtomicU64,
}

/// Thread-safe bounded FIFO of [`QueueEntry`]
pub struct EventQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    max_size: usize,
    metrics: QueueMetrics,
    clock: Arc<dyn Clock>,
}

impl EventQueue {
    /// Create a queue that holds at most `max_size` entries
    pub fn new(max_size: usize) -> Self {
        Self::with_clock(max_size, Arc::new(SystemClock))
    }

    /// Create a queue that stamps entries with time from `clock`
    pub fn with_clock(max_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_size.min(1024))),
            max_size,
            metrics: QueueMetrics::default(),
            clock,
        }
    }

    /// Append an event
    ///
    /// Returns `false` without blocking when the queue is full.
    pub fn enqueue(&self, event: Arc<Event>) -> bool {
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_size {
            drop(entries);
            self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        entries.push_back(QueueEntry::new(event, self.clock.now()));
        drop(entries);

        self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Remove up to `max` entries in FIFO order (`None` = all)
    pub fn drain(&self, max: Option<usize>) -> Vec<QueueEntry> {
        let mut entries = self.entries.lock();
        let count = max.map_or(entries.len(), |m| m.min(entries.len()));
        let drained: Vec<QueueEntry> = entries.drain(..count).collect();
        drop(entries);

        self.metrics
            .drained
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        drained
    }

    /// Put entries back at the front, preserving their order
    ///
    /// Entries that no longer fit (newer events took their place) are
    /// handed back so the caller can count them as dropped.
    pub fn requeue(&self, mut retry: Vec<QueueEntry>) -> Vec<QueueEntry> {
        let mut entries = self.entries.lock();
        let room = self.max_size.saturating_sub(entries.len());
        let overflow = retry.split_off(room.min(retry.len()));

        for entry in retry.into_iter().rev() {
            entries.push_front(entry);
        }
        overflow
    }

    /// Discard everything, returning how many entries were removed
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let n = entries.len();
        entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Total events accepted
    pub fn total_enqueued(&self) -> u64 {
        self.metrics.enqueued.load(Ordering::Relaxed)
    }

    /// Total events rejected because the queue was full
    pub fn total_rejected(&self) -> u64 {
        self.metrics.rejected.load(Ordering::Relaxed)
    }

    /// Total entries handed to the flush path
    pub fn total_drained(&self) -> u64 {
        self.metrics.drained.load(Ordering::Relaxed)
    }
}
