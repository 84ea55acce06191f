//! Tracing subscriber setup.
//!
//! Logs go to stderr, and additionally to a daily-rolling file when
//! `[logging].dir` is configured. `RUST_LOG` overrides the default filter,
//! which is `debug` outside production and `info` in production.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Default filter directive for the configured environment.
pub fn default_filter(config: &Config) -> &'static str {
    if config.environment.is_debug() {
        "calpilot=debug,tower_http=debug"
    } else {
        "calpilot=info,tower_http=info"
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init(config: &Config) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(config).into());

    let (file_layer, guard) = match config.logging.dir {
        Some(ref dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "calpilot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(environment = %config.environment, "CalPilot startup");
    Ok(guard)
}
