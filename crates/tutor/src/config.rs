use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Directory containing the running executable. Config and logs live here
/// unless overridden.
pub fn exe_directory() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    exe.parent().map(|p| p.to_path_buf())
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Ask the service for newline-delimited fragments instead of one body.
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Upper bound on the wait for each streamed fragment.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_capture_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    /// When true, a free-form send with no captured frame is not issued.
    #[serde(default = "default_require_frame")]
    pub require_frame: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// How long shutdown waits for an in-flight session before abandoning it.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,
    /// Override log directory. Default: "logs/" next to the executable.
    pub directory: Option<String>,
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_endpoint() -> String { "http://localhost:11434/api/generate".into() }
fn default_model() -> String { "art-tutor".into() }
fn default_stream() -> bool { true }
fn default_connect_timeout_secs() -> u64 { 10 }
fn default_read_timeout_secs() -> u64 { 120 }
fn default_capture_enabled() -> bool { true }
fn default_interval_secs() -> u64 { 5 }
fn default_max_width() -> u32 { 1920 }
fn default_require_frame() -> bool { true }
fn default_shutdown_grace_secs() -> u64 { 10 }
fn default_logging_enabled() -> bool { true }
fn default_level() -> String { "info".into() }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            stream: default_stream(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: default_capture_enabled(),
            interval_secs: default_interval_secs(),
            max_width: default_max_width(),
            require_frame: default_require_frame(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            directory: None,
            level: default_level(),
        }
    }
}

impl CaptureConfig {
    pub fn interval(&self) -> Duration {
        // A zero interval would turn the sampler into a busy loop.
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl SessionConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load `path`, or `config.toml` next to the executable. Falls back to
    /// defaults when the file is missing or unparseable. Runs before tracing
    /// is up, so problems go to stderr.
    pub fn load(path: Option<&Path>) -> Self {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let Some(dir) = exe_directory() else {
                    eprintln!("[tutor] Could not determine executable directory, using defaults");
                    return Self::default();
                };
                dir.join("config.toml")
            }
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::from_toml(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("[tutor] Failed to parse {}: {e}", config_path.display());
                    Self::default()
                }
            },
            Err(_) => {
                eprintln!(
                    "[tutor] {} not found, using defaults",
                    config_path.display()
                );
                Self::default()
            }
        }
    }
}
