//! vigil-pipe - feed newline-delimited JSON into a vigil pipeline
//!
//! Every stdin line is either an event or a breadcrumb:
//!
//! ```text
//! {"category":"error","payload":{"message":"checkout failed"},"contexts":{"os":"linux"}}
//! {"breadcrumb":{"category":"ui.click","message":"button#pay"}}
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Print envelopes to stdout
//! cat events.ndjson | vigil-pipe
//!
//! # Deliver to a collector
//! VIGIL_ENDPOINT=http://localhost:8080/api/envelope vigil-pipe < events.ndjson
//! ```
//!
//! ## Environment Variables
//!
//! - `VIGIL_ENDPOINT`: collector URL (default: print to stdout)
//! - `VIGIL_MAX_QUEUE_SIZE`, `VIGIL_FLUSH_INTERVAL_MS`, ...: see `Config::from_env`
//! - `VIGIL_LOG_LEVEL`: log level (default: "info")
//! - `VIGIL_LOG_FORMAT`: `pretty` or `json`
//! - `VIGIL_DUMP_METRICS`: print Prometheus metrics to stderr on exit

use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use vigil_sdk::metrics::{self, Metrics};
use vigil_sdk::{
    Breadcrumb, Config, EventData, HttpTransport, LogFormat, Pipeline, StdoutTransport, Transport,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);
    Metrics::init()?;

    let transport: Arc<dyn Transport> = match &config.endpoint {
        Some(endpoint) => Arc::new(HttpTransport::new(endpoint.clone())?),
        None => Arc::new(StdoutTransport::new()),
    };
    info!(
        endpoint = config.endpoint.as_deref().unwrap_or("stdout"),
        max_queue_size = config.max_queue_size,
        "Starting vigil-pipe"
    );

    let pipeline = Pipeline::start(config, transport)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut skipped = 0u64;
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !handle_line(&pipeline, &line) {
                        skipped += 1;
                    }
                }
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read stdin");
                    break;
                }
            },
            _ = &mut shutdown => break,
        }
    }

    let stats = pipeline.stats();
    pipeline.shutdown().await;
    info!(
        captured = stats.captured,
        skipped_lines = skipped,
        "vigil-pipe shutdown complete"
    );

    if std::env::var_os("VIGIL_DUMP_METRICS").is_some() {
        eprint!("{}", metrics::gather());
    }
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries envelopes, logs go to stderr
    match config.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

/// Returns `false` when the line was not usable
fn handle_line(pipeline: &Pipeline, line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }

    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "skipping malformed line");
            return false;
        }
    };

    if let Some(crumb) = value.get("breadcrumb") {
        return match serde_json::from_value::<Breadcrumb>(crumb.clone()) {
            Ok(crumb) => {
                pipeline.add_breadcrumb(crumb);
                true
            }
            Err(e) => {
                debug!(error = %e, "skipping malformed breadcrumb");
                false
            }
        };
    }

    match EventData::from_json(value) {
        Some(data) => {
            if let Some(id) = pipeline.capture(data) {
                debug!(%id, "event captured");
            }
            true
        }
        None => {
            debug!("skipping line that is neither event nor breadcrumb");
            false
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
