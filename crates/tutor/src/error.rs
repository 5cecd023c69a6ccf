//! Error types for the tutor core.

use std::time::Duration;

/// Everything the capture, model and lifecycle layers can fail with.
///
/// `Capture` and `MalformedChunk` are absorbed where they happen; the rest
/// reach the caller or the view exactly once.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A screenshot could not be taken or encoded. Transient.
    #[error("screen capture failed: {0}")]
    Capture(String),

    /// Non-success status or transport failure talking to the model service.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// A streamed line that is not a usable response fragment.
    #[error("malformed response chunk: {0}")]
    MalformedChunk(String),

    /// The model client panicked while a session was running.
    #[error("chat session crashed: {0}")]
    Crashed(String),

    /// A chat session is already requesting or streaming.
    #[error("a chat session is already in progress")]
    SessionBusy,

    /// A background thread did not stop within its bound.
    #[error("{component} did not stop within {timeout:?}")]
    ShutdownTimeout {
        component: &'static str,
        timeout: Duration,
    },

    /// The config file exists but could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error (thread spawn, file system).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors a stream consumer should skip rather than fail on.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::MalformedChunk(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, Error>;
