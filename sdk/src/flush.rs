//! Flush path: drain the queue, seal envelopes, send, act on the outcome
//!
//! All transport I/O happens here. Flushes are single-flight: a request that
//! arrives while a flush is running marks the gate pending and the running
//! flush performs one follow-up pass before it releases the gate.
//!
//! ```text
//!   capture ──► EventQueue ──► drain ──► Envelope::seal ──► Transport::send
//!                    ▲                                          │
//!                    └──────── requeue (transient / other) ◄────┘
//! ```

use crate::clock::Clock;
use crate::config::Config;
use crate::envelope::Envelope;
use crate::error::DropReason;
use crate::metrics;
use crate::queue::{EventQueue, QueueEntry};
use crate::rate_limit::RateLimiter;
use crate::stats::Counters;
use crate::transport::{SendOutcome, Transport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// What asked for a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    Interval,
    Threshold,
    Manual,
    Shutdown,
}

impl Trigger {
    /// Timer and size-threshold flushes wait out the backoff window
    fn respects_backoff(self) -> bool {
        matches!(self, Trigger::Interval | Trigger::Threshold)
    }
}

/// Exponential backoff after transient delivery failures
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
    until: Option<Instant>,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: None,
            until: None,
        }
    }

    /// Record a failure, returning the new window
    fn fail(&mut self, now: Instant) -> Duration {
        let next = match self.current {
            Some(d) => d.saturating_mul(2).min(self.max),
            None => self.initial,
        };
        self.current = Some(next);
        self.until = Some(now + next);
        next
    }

    fn reset(&mut self) {
        self.current = None;
        self.until = None;
    }

    fn is_active(&self, now: Instant) -> bool {
        self.until.is_some_and(|until| now < until)
    }
}

#[derive(Debug, Default)]
struct GateState {
    running: bool,
    pending: bool,
}

/// Single-flight gate; the watch channel mirrors `running`
struct Gate {
    state: Mutex<GateState>,
    running: watch::Sender<bool>,
}

impl Gate {
    fn new() -> Self {
        let (running, _) = watch::channel(false);
        Self {
            state: Mutex::new(GateState::default()),
            running,
        }
    }

    /// Take the gate, or mark a follow-up pass if someone holds it
    fn try_begin(&self) -> bool {
        let mut state = self.state.lock();
        if state.running {
            state.pending = true;
            return false;
        }
        state.running = true;
        self.running.send_replace(true);
        true
    }

    /// Consume a pending request, or release the gate
    fn repeat_or_end(&self) -> bool {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.pending) {
            return true;
        }
        state.running = false;
        self.running.send_replace(false);
        false
    }

    /// Unconditional release, used when a drive unwinds or is cancelled
    fn release(&self) {
        let mut state = self.state.lock();
        state.running = false;
        state.pending = false;
        self.running.send_replace(false);
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.running.subscribe()
    }
}

/// Ownership of the gate for the duration of one drive
///
/// Dropping it while still held releases the gate, so a panic or a cancelled
/// flush never wedges later flushes.
struct GateHold<'a> {
    gate: &'a Gate,
    held: bool,
}

impl<'a> GateHold<'a> {
    fn new(gate: &'a Gate) -> Self {
        Self { gate, held: true }
    }

    fn repeat_or_end(&mut self) -> bool {
        self.held = self.gate.repeat_or_end();
        self.held
    }
}

impl Drop for GateHold<'_> {
    fn drop(&mut self) {
        if self.held {
            self.gate.release();
        }
    }
}

/// Owns the delivery side of a pipeline
pub(crate) struct Flusher {
    queue: Arc<EventQueue>,
    rate_limiter: Arc<RateLimiter>,
    transport: Arc<dyn Transport>,
    counters: Arc<Counters>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
    max_batch_size: Option<usize>,
    send_client_reports: bool,
    backoff: Mutex<Backoff>,
    gate: Gate,
    threshold: Notify,
}

impl Flusher {
    pub(crate) fn new(
        config: &Config,
        queue: Arc<EventQueue>,
        rate_limiter: Arc<RateLimiter>,
        transport: Arc<dyn Transport>,
        counters: Arc<Counters>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            rate_limiter,
            transport,
            counters,
            clock,
            max_retries: config.max_retries,
            max_batch_size: config.max_batch_size,
            send_client_reports: config.send_client_reports,
            backoff: Mutex::new(Backoff::new(
                config.retry_backoff_initial,
                config.retry_backoff_max,
            )),
            gate: Gate::new(),
            threshold: Notify::new(),
        }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Ask the worker for an early flush; coalesces with pending requests
    pub(crate) fn request_threshold_flush(&self) {
        self.threshold.notify_one();
    }

    pub(crate) fn backing_off(&self) -> bool {
        self.backoff.lock().is_active(self.clock.now())
    }

    /// Run a flush on the current task (no-op beyond marking pending if one is running)
    pub(crate) async fn run(&self, trigger: Trigger) {
        if trigger.respects_backoff() && self.backing_off() {
            trace!(?trigger, "flush skipped during backoff");
            return;
        }
        if !self.gate.try_begin() {
            trace!(?trigger, "flush already running, follow-up pass queued");
            return;
        }
        self.drive(trigger).await;
    }

    /// Flush in a background task and wait up to `timeout` for the gate to go idle
    ///
    /// Returns `true` when the flush finished in time and the queue is empty.
    /// A flush still running at the deadline keeps going; its entries are not lost.
    pub(crate) async fn flush_within(self: &Arc<Self>, trigger: Trigger, timeout: Duration) -> bool {
        let mut running = self.gate.subscribe();
        if self.gate.try_begin() {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.drive(trigger).await });
        }

        let idle = tokio::time::timeout(timeout, running.wait_for(|running| !*running))
            .await
            .is_ok_and(|r| r.is_ok());
        idle && self.queue.is_empty()
    }

    /// Gate already held by the caller
    async fn drive(&self, trigger: Trigger) {
        let mut hold = GateHold::new(&self.gate);
        loop {
            self.pass(trigger).await;
            if !hold.repeat_or_end() {
                break;
            }
        }
    }

    /// One pass over the entries present when it started
    async fn pass(&self, trigger: Trigger) {
        let started = Instant::now();
        self.rate_limiter.prune();

        let mut remaining = self.queue.len();
        while remaining > 0 {
            let take = self.max_batch_size.map_or(remaining, |max| max.min(remaining));
            let batch = self.queue.drain(Some(take));
            if batch.is_empty() {
                break;
            }
            remaining = remaining.saturating_sub(batch.len());

            if !self.send_batch(batch, trigger).await {
                break;
            }
        }

        metrics::try_set_queue_size(self.queue.len());
        metrics::try_record_flush_latency(started.elapsed().as_secs_f64());
    }

    /// Send one batch; returns `false` when the pass should stop early
    async fn send_batch(&self, batch: Vec<QueueEntry>, trigger: Trigger) -> bool {
        let (limited, batch): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .partition(|e| self.rate_limiter.is_limited(&e.event.category));
        self.drop_entries(&limited, DropReason::RateLimited);
        if batch.is_empty() {
            return true;
        }

        let report = if self.send_client_reports {
            self.counters.discards().take_report()
        } else {
            None
        };
        let events = batch.iter().map(|e| Arc::clone(&e.event)).collect();
        let envelope = match Envelope::seal(events, report.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, count = batch.len(), "failed to encode envelope, dropping batch");
                if let Some(report) = report {
                    self.counters.discards().restore(report);
                }
                self.drop_entries(&batch, DropReason::Internal);
                return true;
            }
        };

        let transport = self.transport.name();
        // Runs on its own task so a panicking transport only costs this batch
        let sender = Arc::clone(&self.transport);
        let outcome = match tokio::spawn(async move { sender.send(&envelope).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    transport,
                    error = %e,
                    count = batch.len(),
                    "transport send aborted, dropping batch"
                );
                self.drop_entries(&batch, DropReason::Internal);
                return true;
            }
        };

        match outcome {
            SendOutcome::Delivered => {
                self.counters.sent(batch.len() as u64);
                self.backoff.lock().reset();
                debug!(transport, count = batch.len(), ?trigger, "batch delivered");
                true
            }
            SendOutcome::NetworkFailure(reason) => {
                let window = self.backoff.lock().fail(self.clock.now());
                let (exhausted, retry): (Vec<_>, Vec<_>) = batch
                    .into_iter()
                    .map(|mut entry| {
                        entry.retry_count += 1;
                        entry
                    })
                    .partition(|entry| entry.retry_count >= self.max_retries);

                debug!(
                    transport,
                    error = %reason,
                    retrying = retry.len(),
                    backoff_ms = window.as_millis() as u64,
                    "transient delivery failure"
                );
                if !exhausted.is_empty() {
                    let now = self.clock.now();
                    let oldest = exhausted.iter().map(|e| e.age(now)).max().unwrap_or_default();
                    debug!(
                        count = exhausted.len(),
                        max_retries = self.max_retries,
                        oldest_ms = oldest.as_millis() as u64,
                        "retries exhausted, dropping events"
                    );
                }
                self.drop_entries(&exhausted, DropReason::RetryExhausted);
                self.requeue(retry);
                false
            }
            SendOutcome::RateLimited(limits) => {
                self.rate_limiter.apply(&limits);
                let (limited, retry): (Vec<_>, Vec<_>) = batch
                    .into_iter()
                    .partition(|e| self.rate_limiter.is_limited(&e.event.category));

                debug!(
                    transport,
                    limits = limits.len(),
                    dropped = limited.len(),
                    requeued = retry.len(),
                    "collector applied rate limits"
                );
                self.drop_entries(&limited, DropReason::RateLimited);
                self.requeue(retry);
                false
            }
            SendOutcome::ClientError(status) => {
                warn!(
                    transport,
                    status,
                    count = batch.len(),
                    "collector rejected batch, dropping events"
                );
                self.drop_entries(&batch, DropReason::ClientError);
                true
            }
        }
    }

    fn requeue(&self, retry: Vec<QueueEntry>) {
        if retry.is_empty() {
            return;
        }
        let overflow = self.queue.requeue(retry);
        if !overflow.is_empty() {
            warn!(count = overflow.len(), "queue full on requeue, dropping events");
            self.drop_entries(&overflow, DropReason::QueueFull);
        }
    }

    fn drop_entries(&self, entries: &[QueueEntry], reason: DropReason) {
        for entry in entries {
            self.counters.event_dropped(reason, &entry.event.category, 1);
        }
    }

    /// Discard whatever is still queued, counting it as a shutdown drop
    pub(crate) fn discard_remaining(&self) -> usize {
        let remaining = self.queue.drain(None);
        if !remaining.is_empty() {
            warn!(count = remaining.len(), "discarding undelivered events at shutdown");
        }
        self.drop_entries(&remaining, DropReason::Shutdown);
        metrics::try_set_queue_size(self.queue.len());
        remaining.len()
    }
}

/// Background task driving interval and size-threshold flushes
pub(crate) struct FlushWorker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl FlushWorker {
    pub(crate) fn spawn(flusher: Arc<Flusher>, interval: Duration) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker_loop(flusher, interval, shutdown_rx));
        Self { handle, shutdown }
    }

    /// Cancel the task without waiting
    pub(crate) fn abort(self) {
        self.handle.abort();
    }

    /// Stop the worker; a flush already in progress completes first
    pub(crate) async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "flush worker ended abnormally");
        }
    }
}

async fn worker_loop(flusher: Arc<Flusher>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    debug!(interval_ms = interval.as_millis() as u64, "flush worker started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if !flusher.queue.is_empty() {
                    flusher.run(Trigger::Interval).await;
                }
            }
            _ = flusher.threshold.notified() => {
                flusher.run(Trigger::Threshold).await;
            }
        }
    }

    info!("flush worker stopped");
}
