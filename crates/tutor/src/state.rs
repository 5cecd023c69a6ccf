use chrono::{DateTime, Local};

use crate::dispatcher::View;

/// What the status line shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Activity {
    #[default]
    Ready,
    Streaming,
    Error(String),
}

impl std::fmt::Display for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Streaming => write!(f, "Streaming..."),
            Self::Error(err) => write!(f, "Error: {err}"),
        }
    }
}

/// In-memory view: the chat display text plus the bits of status a front
/// end renders around it.
#[derive(Debug, Default)]
pub struct Transcript {
    text: String,
    activity: Activity,
    last_frame_at: Option<DateTime<Local>>,
    frames_seen: u64,
}

impl Transcript {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    /// Capture time of the newest frame the sampler reported.
    pub fn last_frame_at(&self) -> Option<DateTime<Local>> {
        self.last_frame_at
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl View for Transcript {
    fn append_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn frame_updated(&mut self, captured_at: DateTime<Local>) {
        self.last_frame_at = Some(captured_at);
        self.frames_seen += 1;
    }

    fn set_activity(&mut self, activity: Activity) {
        self.activity = activity;
    }
}
