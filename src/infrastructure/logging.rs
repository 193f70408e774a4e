//! Tracing subscriber setup.

use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::domain::errors::ConfigError;

use super::config::LoggingConfig;

/// Installs a global subscriber for the library's `tracing` output.
///
/// `RUST_LOG` takes precedence over the configured level. Logs go to the
/// configured file, or to stderr when no path is set. Does nothing if the
/// host application already installed a subscriber.
///
/// # Errors
/// Returns error if the log file or its directory cannot be created.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        if tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .try_init()
            .is_ok()
        {
            info!(path = %log_path.display(), "Logging initialized");
        }
    } else {
        let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .try_init();
    }

    Ok(())
}
