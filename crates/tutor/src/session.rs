//! One request/response cycle against the model service.
//!
//! A [`ChatSession`] starts `Idle`, moves to `Requesting` when run, to
//! `Streaming` on the first fragment, and ends in exactly one of
//! `Completed` or `Failed`. Its progress is published to the view as
//! [`UiEvent`]s and to the controller through a shared [`SessionStatus`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::{ChatRequest, ModelService};
use crate::dispatcher::{EventSender, UiEvent};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One ordered fragment of a session's reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatChunk {
    pub session: SessionId,
    /// Zero-based, strictly increasing within the session.
    pub seq: u64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Requesting = 1,
    Streaming = 2,
    Completed = 3,
    Failed = 4,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Requesting,
            2 => Self::Streaming,
            3 => Self::Completed,
            _ => Self::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Read-only view of a session's state, shareable across threads.
#[derive(Debug, Clone)]
pub struct SessionStatus(Arc<AtomicU8>);

impl SessionStatus {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(SessionState::Idle as u8)))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

pub struct ChatSession {
    id: SessionId,
    request: ChatRequest,
    status: SessionStatus,
}

impl ChatSession {
    pub fn new(id: SessionId, request: ChatRequest) -> Self {
        Self {
            id,
            request,
            status: SessionStatus::new(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status.clone()
    }

    /// Drive the request to a terminal state, posting every fragment as it
    /// arrives. Consumes the session: a finished session cannot be re-run.
    ///
    /// The terminal event is posted before the terminal state is published,
    /// so anyone who observes `Completed`/`Failed` knows the session's last
    /// event is already queued. A panic in the client ends the session as
    /// `Failed` like any other error.
    pub fn run(self, client: &dyn ModelService, events: &EventSender) -> SessionState {
        self.status.set(SessionState::Requesting);
        info!(
            session = %self.id,
            prompt_len = self.request.prompt.len(),
            with_frame = self.request.frame.is_some(),
            "session requesting"
        );

        match panic::catch_unwind(AssertUnwindSafe(|| self.stream_reply(client, events))) {
            Ok(state) => state,
            Err(payload) => self.fail(Error::Crashed(panic_message(payload.as_ref())), events),
        }
    }

    fn stream_reply(&self, client: &dyn ModelService, events: &EventSender) -> SessionState {
        let fragments = match client.generate(&self.request) {
            Ok(fragments) => fragments,
            Err(e) => return self.fail(e, events),
        };

        let mut seq = 0u64;
        for item in fragments {
            match item {
                Ok(text) => {
                    if seq == 0 {
                        self.status.set(SessionState::Streaming);
                    }
                    events.post(UiEvent::ChunkAppended(ChatChunk {
                        session: self.id,
                        seq,
                        text,
                    }));
                    seq += 1;
                }
                Err(e) if e.is_skippable() => {
                    warn!(session = %self.id, error = %e, "skipping fragment");
                }
                Err(e) => return self.fail(e, events),
            }
        }

        events.post(UiEvent::SessionCompleted { session: self.id });
        self.status.set(SessionState::Completed);
        info!(session = %self.id, chunks = seq, "session completed");
        SessionState::Completed
    }

    fn fail(&self, error: Error, events: &EventSender) -> SessionState {
        warn!(session = %self.id, error = %error, "session failed");
        events.post(UiEvent::SessionFailed {
            session: self.id,
            message: error.to_string(),
        });
        self.status.set(SessionState::Failed);
        debug!(session = %self.id, "failure event queued");
        SessionState::Failed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
