use tracing::Level;

use crate::config::{LogFormat, LoggingConfig};

/// Installs the global fmt subscriber. Later calls are no-ops.
pub fn init(config: &LoggingConfig) {
    let log_level = config.level.parse::<Level>().unwrap_or(Level::INFO);

    let result = match config.format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(log_level)
            .compact()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(log_level)
            .pretty()
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(log_level)
            .json()
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!(
            event_name = "system.logging.already_initialized",
            "global subscriber already installed"
        );
    }
}
