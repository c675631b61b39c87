//! Shared logging utilities for consistent tracing setup

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber with an optional log level.
///
/// The level applies to our own crates; noisy dependencies are pinned to
/// warn unless overridden through `RUST_LOG`.
pub fn init_tracing(log_level: Option<&str>) {
    let base_level = log_level.unwrap_or("info");
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        format!("supervisor={base_level},shared={base_level},reqwest=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(EnvFilter::new(&filter))
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Log a standard service-startup banner.
pub fn log_startup(service: &str) {
    tracing::info!("🚀 Starting {service}");
}

/// Log a standard shutdown line with the trigger.
pub fn log_shutdown(reason: &str) {
    tracing::info!("🛑 Shutting down: {reason}");
}
