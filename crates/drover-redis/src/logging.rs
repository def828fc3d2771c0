//! Logging initialisation for the worker binary.
//!
//! Library crates only emit `tracing` events; installing the subscriber
//! is the binary's job, once at startup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber: compact format on stderr, filtered by
/// `RUST_LOG` when set and by `default_level` otherwise.
pub fn init(service_name: &str, default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();

    tracing::info!(service = service_name, "logging initialized");
}
