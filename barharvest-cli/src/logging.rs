//! Tracing subscriber setup.
//!
//! Console output always; with a log directory, also a daily-rotated
//! `barharvest.log` and an error-only `errors.log`. `RUST_LOG` overrides the
//! configured level.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Keep the returned guards alive until exit;
/// dropping them flushes the file writers.
pub fn init(level: &str, dir: Option<&Path>) -> Result<Vec<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{level}'"))?;

    let mut guards = Vec::new();
    let (main_layer, error_layer) = match dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let (main, main_guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "barharvest.log"));
            let (errors, error_guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, "errors.log"));
            guards.push(main_guard);
            guards.push(error_guard);
            (
                Some(fmt::layer().with_ansi(false).with_writer(main)),
                Some(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(errors)
                        .with_filter(LevelFilter::ERROR),
                ),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(main_layer)
        .with(error_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guards)
}
