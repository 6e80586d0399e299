//! Tracing subscriber setup for the binary

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Result, TripwireError};

/// Install the global subscriber.
///
/// RUST_LOG wins over the configured level. When a log directory is configured,
/// events are also written to a daily-rolling `tripwire.log` without ANSI colors;
/// keep the returned guard alive for as long as logs should be flushed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| TripwireError::ConfigError(format!("Invalid log level '{}': {}", config.level, e)))?;

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    match config.directory {
        Some(ref dir) => {
            std::fs::create_dir_all(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, "tripwire.log"));
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| TripwireError::ConfigError(format!("Logger already set: {}", e)))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init()
                .map_err(|e| TripwireError::ConfigError(format!("Logger already set: {}", e)))?;
            Ok(None)
        }
    }
}
