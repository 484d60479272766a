//! vigil-sdk - event ingestion and delivery for client-side telemetry
//!
//! Producers (UI listeners, HTTP interceptors, application code) hand events
//! and breadcrumbs to a [`Pipeline`]. The pipeline enriches events with recent
//! breadcrumbs, enforces collector rate limits, buffers them in a bounded
//! queue and delivers them in batches from a background task.
//!
//! # Architecture
//!
//! ```text
//! Producers ──► Pipeline ──► EventQueue ──► FlushWorker ──► Transport ──► collector
//!                  │                                           │
//!            BreadcrumbRing                         RateLimiter ◄┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vigil_sdk::{Breadcrumb, Config, EventData, HttpTransport, Pipeline};
//!
//! # async fn run() -> vigil_sdk::Result<()> {
//! let transport = HttpTransport::new("https://collector.example.com/api/envelope")?;
//! let pipeline = Pipeline::start(Config::default(), Arc::new(transport))?;
//!
//! pipeline.add_breadcrumb(Breadcrumb::new("ui.click", "button#checkout"));
//! pipeline.capture(EventData::message("error", "payment form failed to load"));
//!
//! pipeline.flush(Duration::from_secs(2)).await;
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod breadcrumbs;
pub mod client_report;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
mod flush;
pub mod metrics;
pub mod pipeline;
pub mod producers;
pub mod queue;
pub mod rate_limit;
pub mod stats;
pub mod transport;

pub use breadcrumbs::BreadcrumbRing;
pub use config::{Config, LogFormat};
pub use error::{DropReason, Result, VigilError};
pub use event::{Breadcrumb, Category, Event, EventData, Level};
pub use pipeline::Pipeline;
pub use queue::EventQueue;
pub use rate_limit::{RateLimit, RateLimiter};
pub use stats::PipelineStats;
pub use transport::{HttpTransport, SendOutcome, StdoutTransport, Transport};
