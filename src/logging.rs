//! Tracing initialization.
//!
//! Structured, async-aware logging for the driver using `tracing` and
//! `tracing-subscriber`. Filtering follows the usual precedence: the
//! `RUST_LOG` environment variable wins, otherwise the level from the
//! settings file applies.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Install the global tracing subscriber.
///
/// `default_level` is a directive string such as "info" or
/// "ttm_meter=debug". Returns an error if a global subscriber is already
/// installed (tests install their own).
pub fn init(default_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))?;

    Ok(())
}
