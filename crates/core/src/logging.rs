//! Structured logging initialization for the ELXR core.
//!
//! Centralized setup with environment-based configuration; services call
//! one of these once at startup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system with structured output.
///
/// Log level is configured via the `RUST_LOG` environment variable and
/// defaults to `info`.
///
/// # Example
/// ```no_run
/// use elxr_core::logging;
///
/// logging::init();
/// tracing::info!("Service started");
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize the logging system with JSON output for production
/// environments and log aggregation.
///
/// # Example
/// ```no_run
/// use elxr_core::logging;
///
/// logging::init_json();
/// tracing::info!(service = "batch-ingest", "Service started");
/// ```
pub fn init_json() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}
