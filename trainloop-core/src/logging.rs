//! Tracing subscriber setup for binaries and notebooks embedding the crate.
//!
//! The library itself only emits `tracing` events; nothing is printed unless
//! the host installs a subscriber, for example with [`init_tracing`].

use crate::config::LoggingConfig;
use crate::error::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Install a human-readable stderr layer plus an optional JSON file layer.
///
/// Returns the file appender guard when file logging is enabled; keep it alive
/// for the lifetime of the process or buffered lines are lost. Calling this
/// when a global subscriber is already installed leaves that subscriber in
/// place.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(&config.level));

    let (json_layer, guard) = match &config.json_log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "trainloop.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    if tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already installed");
    }
    Ok(guard)
}
