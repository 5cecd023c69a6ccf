use std::fs;
use std::path::PathBuf;

use tracing::Level;

use crate::config::{exe_directory, LoggingConfig};

const LOG_FILE: &str = "tutor.log";

fn log_directory(config: &LoggingConfig) -> Option<PathBuf> {
    if let Some(ref custom) = config.directory {
        return Some(PathBuf::from(custom));
    }
    exe_directory().map(|d| d.join("logs"))
}

/// Set up tracing-subscriber to write to tutor.log. Stdout belongs to the
/// console view, so nothing is logged there. Failures are silent: the app
/// runs fine without a log.
pub fn init_tracing(config: &LoggingConfig) {
    if !config.enabled {
        return;
    }
    let Some(dir) = log_directory(config) else { return };
    if fs::create_dir_all(&dir).is_err() {
        return;
    }

    let level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let file_appender = tracing_appender::rolling::never(dir, LOG_FILE);
    let subscriber = tracing_subscriber::fmt()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
