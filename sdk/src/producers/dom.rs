//! UI interaction breadcrumbs
//!
//! The listener that observes the UI hands over already-stringified targets
//! (for example `body > div#app > button.save`); this producer only decides
//! whether an interaction becomes a breadcrumb and what it looks like.

use crate::Pipeline;
use crate::clock::{Clock, SystemClock};
use crate::event::Breadcrumb;
use crate::producers::truncate;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

const UNKNOWN_TARGET: &str = "<unknown>";

/// One observed UI interaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomEvent {
    /// Interaction kind: `click`, `keypress`, `input`, ...
    pub kind: String,
    /// Stringified target element
    pub target: Option<String>,
    /// Component name the target belongs to, if known
    pub component: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl DomEvent {
    pub fn new(kind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: Some(target.into()),
            ..Default::default()
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct DomOptions {
    /// Longest target description kept, in characters
    pub max_string_length: usize,
    /// Window in which repeated typing on one target is coalesced
    pub debounce: Duration,
}

impl Default for DomOptions {
    fn default() -> Self {
        Self {
            max_string_length: 80,
            debounce: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug)]
struct LastTyping {
    target: String,
    at: Instant,
}

/// Turns UI interactions into `ui.<kind>` breadcrumbs
pub struct DomBreadcrumbs {
    pipeline: Pipeline,
    options: DomOptions,
    clock: Arc<dyn Clock>,
    last_typing: Mutex<Option<LastTyping>>,
}

impl DomBreadcrumbs {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            options: DomOptions::default(),
            clock: Arc::new(SystemClock),
            last_typing: Mutex::new(None),
        }
    }

    pub fn with_options(mut self, options: DomOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record an interaction; returns `true` when a breadcrumb was added
    pub fn record(&self, event: DomEvent) -> bool {
        match self.to_breadcrumb(event) {
            Some(crumb) => {
                self.pipeline.add_breadcrumb(crumb);
                true
            }
            None => false,
        }
    }

    fn to_breadcrumb(&self, event: DomEvent) -> Option<Breadcrumb> {
        let kind = event.kind.trim();
        if kind.is_empty() {
            return None;
        }

        let target = match event.target.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => truncate(t, self.options.max_string_length),
            _ => UNKNOWN_TARGET.to_string(),
        };

        if is_typing(kind) {
            if self.debounced(&target) {
                trace!(target = %target, "typing breadcrumb debounced");
                return None;
            }
        } else {
            *self.last_typing.lock() = None;
        }

        let mut crumb = Breadcrumb::new(format!("ui.{kind}"), target);
        if let Some(ts) = event.timestamp {
            crumb = crumb.with_timestamp(ts);
        }
        if let Some(component) = event.component.filter(|c| !c.is_empty()) {
            crumb = crumb.with_data("component", component);
        }
        Some(crumb)
    }

    /// Typing on the same target inside the window extends it instead of
    /// producing another breadcrumb
    fn debounced(&self, target: &str) -> bool {
        let now = self.clock.now();
        let mut last = self.last_typing.lock();
        match last.as_mut() {
            Some(prev)
                if prev.target == target
                    && now.saturating_duration_since(prev.at) < self.options.debounce =>
            {
                prev.at = now;
                true
            }
            _ => {
                *last = Some(LastTyping {
                    target: target.to_string(),
                    at: now,
                });
                false
            }
        }
    }
}

fn is_typing(kind: &str) -> bool {
    matches!(kind, "keypress" | "input")
}
