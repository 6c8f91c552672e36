#![cfg_attr(test, allow(clippy::unwrap_used))]

use anyhow::{Context as _, Result};
use tracing::Subscriber;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter::ParseError, fmt, layer::SubscriberExt as _,
    util::SubscriberInitExt as _,
};

/// Registers a global subscriber with stdout logging.
///
/// Directives follow the usual `RUST_LOG` syntax, e.g. `info,paradrop_confd=debug`.
pub fn setup_global_subscriber(directives: &str) -> Result<()> {
    let filter = try_filter(directives).context("Failed to parse directives")?;

    let subscriber = Registry::default().with(fmt::layer().with_filter(filter));
    init(subscriber)?;

    Ok(())
}

pub fn init(subscriber: impl Subscriber + Send + Sync + 'static) -> Result<()> {
    subscriber
        .try_init()
        .context("Could not set global default")?;
    LogTracer::init().ok();

    Ok(())
}

/// Installs a test subscriber; safe to call from multiple tests.
pub fn test_global(directives: &str) {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .try_init()
        .ok();
}

/// Constructs an [`EnvFilter`] with some noisy crates already silenced.
pub fn try_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    EnvFilter::try_new(format!("hyper=warn,bollard=info,{directives}"))
}
