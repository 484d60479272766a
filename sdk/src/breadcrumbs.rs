//! Ring buffer of recent breadcrumbs

use crate::event::Breadcrumb;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe, fixed-capacity breadcrumb ring
///
/// When full, the oldest breadcrumb is evicted (FIFO). A capacity of zero
/// disables breadcrumbs entirely.
pub struct BreadcrumbRing {
    crumbs: Mutex<VecDeque<Breadcrumb>>,
    capacity: usize,
    added: AtomicU64,
    evicted: AtomicU64,
}

impl BreadcrumbRing {
    /// Create a new ring with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            crumbs: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            added: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Append a breadcrumb, evicting the oldest one at capacity
    pub fn add(&self, crumb: Breadcrumb) {
        if self.capacity == 0 {
            return;
        }

        let mut crumbs = self.crumbs.lock();
        if crumbs.len() >= self.capacity {
            crumbs.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        crumbs.push_back(crumb);
        self.added.fetch_add(1, Ordering::Relaxed);
    }

    /// Independent copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<Breadcrumb> {
        self.crumbs.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.crumbs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.crumbs.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.crumbs.lock().clear();
    }

    /// Total breadcrumbs ever stored
    pub fn total_added(&self) -> u64 {
        self.added.load(Ordering::Relaxed)
    }

    /// Total breadcrumbs pushed out by newer ones
    pub fn total_evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}
