//! Diagnostic logging setup and the JSON-lines access log.
//!
//! Diagnostics go through `tracing`: the console always, plus a daily-rolling
//! file when a log directory is configured. The access log is a separate,
//! size-rotated file with one JSON object per line.

pub mod access;
pub mod rotation;

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub use access::{AccessEntry, AccessLog, StartEntry, StopEntry};
pub use rotation::LogRotator;

/// File name prefix for the rolling diagnostic log.
pub const DIAGNOSTIC_LOG_PREFIX: &str = "lanshare.log";

/// Filter directive for the given level and verbosity.
///
/// `-v` forces debug for this crate and the perimeter crate; everything else
/// stays at the configured level.
pub fn filter_directive(level: &str, verbose: bool) -> String {
    if verbose {
        format!("{level},daemon=debug,lanshare=debug,perimeter=debug")
    } else {
        level.to_string()
    }
}

/// Install the global subscriber.
///
/// Returns the appender guard when file logging is enabled; dropping it
/// flushes and stops the background writer.
pub fn init_tracing(
    level: &str,
    verbose: bool,
    dir: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(filter_directive(level, verbose))?;
    let console = fmt::layer().with_target(verbose);

    let (file_layer, guard) = match dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, DIAGNOSTIC_LOG_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
