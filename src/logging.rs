//! Structured logging and tracing for Heliocharge
//!
//! Console and daily-rotated file output through the tracing ecosystem, plus
//! a small context-carrying logger used by the allocation core so that every
//! per-load-point message names the load point it concerns.

use crate::config::LoggingConfig;
use crate::error::{HelioError, Result};
use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Once;
use tracing::{Level, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod level;
mod structured;

pub use level::{min_level, parse_log_level};
pub use structured::{LogContext, StructuredLogger, get_logger, get_logger_with_context};

// Keep the non-blocking worker guard alive for the entire process lifetime
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static INIT_ONCE: Once = Once::new();
static INIT_ERROR: OnceCell<String> = OnceCell::new();

/// Install the global subscriber described by `config`.
///
/// Runs once per process; later calls return the outcome of the first one.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INIT_ONCE.call_once(|| {
        if let Err(e) = install(config) {
            let _ = INIT_ERROR.set(e.to_string());
        }
    });

    match INIT_ERROR.get() {
        Some(err) => Err(HelioError::config(err.clone())),
        None => Ok(()),
    }
}

/// Console and file levels, each falling back to the base `level`
fn resolve_levels(config: &LoggingConfig) -> Result<(Level, Level)> {
    let base = parse_log_level(&config.level)?;
    let pick = |over: &Option<String>| {
        over.as_deref()
            .and_then(|s| parse_log_level(s).ok())
            .unwrap_or(base)
    };
    Ok((pick(&config.console_level), pick(&config.file_level)))
}

fn install(config: &LoggingConfig) -> Result<()> {
    let (console_level, file_level) = resolve_levels(config)?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("heliocharge={}", min_level(console_level, file_level)).into());

    if console_only() {
        // a test harness may already own the global subscriber
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(output_layer(std::io::stdout, config.json_format, console_level, true))
            .try_init();
        info!("Logging to console only at {:?}", console_level);
        return Ok(());
    }

    let appender = rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix("heliocharge")
        .filename_suffix("log")
        .max_log_files(config.backup_count.max(1) as usize)
        .build(log_dir(&config.file))
        .map_err(|e| HelioError::io(format!("Cannot open log directory: {}", e)))?;
    let (writer, guard) = non_blocking(appender);
    let _ = LOG_GUARD.set(guard);

    let console = config
        .console_output
        .then(|| output_layer(std::io::stdout, config.json_format, console_level, true));

    tracing_subscriber::registry()
        .with(filter)
        .with(output_layer(writer, config.json_format, file_level, false))
        .with(console)
        .try_init()
        .map_err(|e| HelioError::config(format!("Cannot install log subscriber: {}", e)))?;

    info!(
        "Logging to {} at {:?} (console {:?})",
        config.file, file_level, console_level
    );
    Ok(())
}

fn console_only() -> bool {
    cfg!(test) || std::env::var_os("HELIOCHARGE_DISABLE_FILE_LOG").is_some()
}

/// `file` may name a log file or the directory to roll files in
fn log_dir(file: &str) -> &Path {
    let p = Path::new(file);
    match (p.extension(), p.parent()) {
        (Some(_), Some(parent)) => parent,
        _ => p,
    }
}

fn output_layer<S, W>(
    writer: W,
    json_format: bool,
    level: Level,
    ansi: bool,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + 'static,
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(false)
        .with_ansi(ansi);
    let level = LevelFilter::from_level(level);
    if json_format {
        layer.json().with_filter(level).boxed()
    } else {
        layer.with_filter(level).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }

    #[test]
    fn test_structured_logger_after_init() {
        init_logging(&LoggingConfig::default()).ok();
        let logger = get_logger_with_context(
            LogContext::new("test_component").with_load_point("connector:c1"),
        );
        logger.info("Test info message");
        logger.debug("Test debug message");
        logger.warn("Test warning message");
        logger.error("Test error message");
    }
}
