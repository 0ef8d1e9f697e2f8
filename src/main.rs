//! hookpool webhook dispatcher.
//!
//! Loads the hook registry from configuration, starts the worker pool, and
//! dispatches newline-delimited JSON events read from stdin:
//!
//! ```text
//! {"tenant": "game1", "event_type": 1, "payload": {"player": "p1"}}
//! ```
//!
//! On end of input every accepted event is delivered before exit. On CTRL+C
//! or SIGTERM the pool stops after the jobs currently being processed.

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use hookpool_delivery::Dispatcher;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use crate::config::Config;

/// One line of input.
#[derive(Debug, Deserialize)]
struct InboundEvent {
    tenant: String,
    event_type: i32,
    payload: serde_json::Value,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log)?;

    info!(
        worker_pool_size = config.worker_pool_size,
        worker_queue_size = config.worker_queue_size,
        webhooks_timeout_seconds = config.webhooks_timeout_seconds,
        hooks = config.hooks.len(),
        "Configuration loaded"
    );

    let registry = Arc::new(config.to_hook_registry());
    let dispatcher = Dispatcher::start(config.to_dispatcher_config(), registry)
        .context("Failed to start dispatcher")?;

    let drained = tokio::select! {
        result = dispatch_stdin(&dispatcher) => {
            let dispatched = result?;
            info!(dispatched, "End of input, waiting for in-flight jobs");
            true
        }
        () = shutdown_signal() => {
            info!(in_flight = dispatcher.in_flight(), "Shutdown signal received");
            false
        }
    };

    if drained {
        dispatcher.wait().await;
    }

    let stats = dispatcher.stats().await;
    info!(
        jobs_submitted = stats.jobs_submitted,
        jobs_completed = stats.jobs_completed,
        successful_deliveries = stats.successful_deliveries,
        failed_deliveries = stats.failed_deliveries,
        "Delivery summary"
    );

    dispatcher.shutdown().await?;
    info!("hookpool shutdown complete");
    Ok(())
}

/// Initializes tracing; `RUST_LOG` takes precedence over the configured
/// filter.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Reads events from stdin until end of input and dispatches each one.
///
/// Malformed lines are logged and skipped. Returns the number of events
/// dispatched.
async fn dispatch_stdin(dispatcher: &Dispatcher) -> Result<u64> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0u64;
    let mut dispatched = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let event: InboundEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line_number, error = %e, "Skipping malformed event");
                continue;
            },
        };

        dispatcher.dispatch_hook(event.tenant, event.event_type, &event.payload).await?;
        dispatched += 1;
    }

    Ok(dispatched)
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
