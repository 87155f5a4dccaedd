//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! JSON file layer with daily rotation, plus an optional human-readable
//! stderr layer controlled by the config's `log.console` flag.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogConfig;

/// Holds the non-blocking writer guard for file logging.
///
/// Must be kept alive for the duration of the process; dropping it flushes
/// pending log entries and closes the file.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Initialise logging from the service config.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init(config: &LogConfig) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(&config.directory).map_err(|e| {
        anyhow::anyhow!("failed to create logs directory {}: {e}", config.directory)
    })?;

    let file_appender = tracing_appender::rolling::daily(&config.directory, "mailgram.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking);

    if config.console {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .init();
    }

    Ok(LoggingGuard { _guard: guard })
}
