use std::path::{Path, PathBuf};

use tracing::Level;

use crate::config::LoggingConfig;

pub const LOG_FILE_NAME: &str = "plant-companion.log";

pub fn log_file_path(directory: &Path) -> PathBuf {
    directory.join(LOG_FILE_NAME)
}

fn max_level(config: &LoggingConfig) -> Level {
    config.level.parse().unwrap_or(Level::INFO)
}

/// Install the global tracing subscriber. Writes to plant-companion.log in the
/// configured directory, or to stderr when none is set. Does nothing when
/// logging is disabled or a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) {
    if !config.enabled {
        return;
    }
    let level = max_level(config);

    let installed = match &config.directory {
        Some(dir) => {
            if let Err(e) = std::fs::create_dir_all(dir) {
                eprintln!("[plant-companion] Cannot create log directory {}: {e}", dir.display());
                return;
            }
            let file_appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let subscriber = tracing_subscriber::fmt()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_max_level(level)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        None => {
            let subscriber = tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_max_level(level)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    };

    if installed.is_ok() {
        let destination = config
            .directory
            .as_deref()
            .map(|dir| log_file_path(dir).display().to_string())
            .unwrap_or_else(|| "stderr".into());
        tracing::info!(%level, %destination, "Tracing initialized");
    }
}
