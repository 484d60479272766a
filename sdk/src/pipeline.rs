//! The pipeline handle producers capture through
//!
//! A [`Pipeline`] owns the breadcrumb ring, the rate limiter, the outbound
//! queue and the background flush worker. It is a cheap `Clone` handle, so
//! every producer gets its own copy and there is no global state.
//!
//! `capture` and `add_breadcrumb` are synchronous and never fail: every
//! rejection is counted as a [`DropReason`] instead.

use crate::breadcrumbs::BreadcrumbRing;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{DropReason, Result, VigilError};
use crate::event::{Breadcrumb, EventData};
use crate::flush::{FlushWorker, Flusher, Trigger};
use crate::metrics;
use crate::queue::EventQueue;
use crate::rate_limit::RateLimiter;
use crate::stats::{Counters, PipelineStats};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Handle to a running pipeline
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    breadcrumbs: BreadcrumbRing,
    queue: Arc<EventQueue>,
    rate_limiter: Arc<RateLimiter>,
    counters: Arc<Counters>,
    flusher: Arc<Flusher>,
    worker: Mutex<Option<FlushWorker>>,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.abort();
        }
    }
}

impl Pipeline {
    /// Start a pipeline delivering through `transport`
    ///
    /// Must be called from within a tokio runtime; the flush worker is
    /// spawned onto it.
    ///
    /// # Errors
    /// Returns `VigilError::Config` for invalid settings and
    /// `VigilError::Runtime` outside a tokio runtime.
    pub fn start(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::start_with_clock(config, transport, Arc::new(SystemClock))
    }

    /// Start a pipeline whose rate limits and backoff read time from `clock`
    pub fn start_with_clock(
        config: Config,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        tokio::runtime::Handle::try_current()
            .map_err(|e| VigilError::Runtime(format!("Pipeline::start outside tokio: {e}")))?;

        let queue = Arc::new(EventQueue::with_clock(
            config.max_queue_size,
            Arc::clone(&clock),
        ));
        let rate_limiter = Arc::new(RateLimiter::with_clock(Arc::clone(&clock)));
        let counters = Arc::new(Counters::default());
        let flusher = Arc::new(Flusher::new(
            &config,
            Arc::clone(&queue),
            Arc::clone(&rate_limiter),
            transport,
            Arc::clone(&counters),
            clock,
        ));
        let worker = FlushWorker::spawn(Arc::clone(&flusher), config.flush_interval);

        info!(
            transport = flusher.transport().name(),
            max_queue_size = config.max_queue_size,
            max_breadcrumbs = config.max_breadcrumbs,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            "pipeline started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                breadcrumbs: BreadcrumbRing::new(config.max_breadcrumbs),
                config,
                queue,
                rate_limiter,
                counters,
                flusher,
                worker: Mutex::new(Some(worker)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Capture an event
    ///
    /// Returns the event id when the event was queued, `None` when it was
    /// dropped (rate limited, queue full, or pipeline shut down).
    pub fn capture(&self, data: EventData) -> Option<String> {
        let inner = &self.inner;

        if inner.closed.load(Ordering::Acquire) {
            inner
                .counters
                .event_dropped(DropReason::Shutdown, &data.category, 1);
            return None;
        }

        if inner.rate_limiter.is_limited(&data.category) {
            trace!(category = %data.category, "event dropped by rate limit");
            inner
                .counters
                .event_dropped(DropReason::RateLimited, &data.category, 1);
            return None;
        }

        let event = data.into_event(inner.breadcrumbs.snapshot());
        let id = event.id.clone();
        let category = event.category.clone();

        if !inner.queue.enqueue(Arc::new(event)) {
            debug!(category = %category, max = inner.queue.max_size(), "queue full, event dropped");
            inner
                .counters
                .event_dropped(DropReason::QueueFull, &category, 1);
            return None;
        }

        inner.counters.captured(&category);
        let queued = inner.queue.len();
        metrics::try_set_queue_size(queued);
        if queued >= inner.config.flush_threshold {
            inner.flusher.request_threshold_flush();
        }

        Some(id)
    }

    /// Record a breadcrumb for future events
    pub fn add_breadcrumb(&self, crumb: Breadcrumb) {
        let inner = &self.inner;
        if inner.config.max_breadcrumbs == 0 {
            return;
        }

        let crumb = match &inner.config.before_breadcrumb {
            None => crumb,
            Some(hook) => match panic::catch_unwind(AssertUnwindSafe(|| hook(crumb))) {
                Ok(Some(crumb)) => crumb,
                Ok(None) => {
                    trace!("breadcrumb vetoed by before_breadcrumb");
                    inner
                        .counters
                        .breadcrumb_dropped(DropReason::BeforeBreadcrumb);
                    return;
                }
                Err(_) => {
                    warn!("before_breadcrumb panicked, breadcrumb dropped");
                    inner.counters.breadcrumb_dropped(DropReason::CallbackPanic);
                    return;
                }
            },
        };

        inner.breadcrumbs.add(crumb);
    }

    /// Flush now, waiting up to `timeout`
    ///
    /// Returns `true` when the flush completed in time and nothing is left
    /// queued. Backoff windows are ignored.
    pub async fn flush(&self, timeout: Duration) -> bool {
        self.inner
            .flusher
            .flush_within(Trigger::Manual, timeout)
            .await
    }

    /// Stop the worker, drain what can be sent within `shutdown_timeout`,
    /// and discard the rest
    ///
    /// Other handles stay valid but `capture` returns `None` afterwards.
    pub async fn shutdown(self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let timeout = inner.config.shutdown_timeout;
        let deadline = tokio::time::Instant::now() + timeout;
        info!(
            queued = inner.queue.len(),
            timeout_ms = timeout.as_millis() as u64,
            "pipeline shutting down"
        );

        let worker = inner.worker.lock().take();
        if let Some(worker) = worker
            && tokio::time::timeout_at(deadline, worker.stop()).await.is_err()
        {
            warn!("flush worker did not stop before shutdown deadline");
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let drained = inner
            .flusher
            .flush_within(Trigger::Shutdown, remaining)
            .await;
        if !drained {
            inner.flusher.discard_remaining();
        }

        if let Err(e) = inner.flusher.transport().shutdown().await {
            warn!(error = %e, "transport shutdown failed");
        }

        let stats = self.stats();
        info!(
            captured = stats.captured,
            sent = stats.sent,
            dropped = stats.total_dropped(),
            "pipeline stopped"
        );
    }

    pub fn stats(&self) -> PipelineStats {
        self.inner
            .counters
            .snapshot(self.inner.queue.len(), self.inner.breadcrumbs.len())
    }

    /// Current breadcrumbs, oldest first
    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        self.inner.breadcrumbs.snapshot()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.rate_limiter
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
