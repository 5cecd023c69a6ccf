use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::api::{ChatRequest, ModelService, REVIEW_PROMPT};
use crate::capture::ScreenshotSource;
use crate::config::Config;
use crate::dispatcher::{EventSender, UiEvent};
use crate::error::{Error, Result};
use crate::mailbox::FrameMailbox;
use crate::sampler::{SamplerHandle, ScreenshotSampler};
use crate::session::{ChatSession, SessionId, SessionState, SessionStatus};

/// What a send or review request turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Started(SessionId),
    /// No frame has been captured yet; nothing was sent.
    NoFrame,
    /// The prompt was blank; nothing was sent.
    EmptyPrompt,
}

/// The one session slot.
struct ActiveSession {
    id: SessionId,
    status: SessionStatus,
    done_rx: Receiver<()>,
    thread: JoinHandle<()>,
}

/// Starts and stops the sampler and owns the single chat session slot.
///
/// Lives on the view thread; `send`/`review` are only called from there.
pub struct LifecycleController {
    config: Config,
    mailbox: FrameMailbox,
    events: EventSender,
    source: Arc<dyn ScreenshotSource>,
    client: Arc<dyn ModelService>,
    sampler: Option<SamplerHandle>,
    active: Option<ActiveSession>,
    next_session: u64,
}

impl LifecycleController {
    pub fn new(
        config: Config,
        source: Arc<dyn ScreenshotSource>,
        client: Arc<dyn ModelService>,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            mailbox: FrameMailbox::new(),
            events,
            source,
            client,
            sampler: None,
            active: None,
            next_session: 1,
        }
    }

    pub fn mailbox(&self) -> &FrameMailbox {
        &self.mailbox
    }

    /// Start the sampler. No-op if capture is disabled or it already runs.
    pub fn startup(&mut self) -> Result<()> {
        if !self.config.capture.enabled {
            info!("capture disabled, sampler not started");
            return Ok(());
        }
        if self.sampler.is_some() {
            return Ok(());
        }

        let sampler = ScreenshotSampler::new(
            Arc::clone(&self.source),
            self.mailbox.clone(),
            self.events.clone(),
        );
        self.sampler = Some(sampler.start(self.config.capture.interval())?);
        Ok(())
    }

    /// State of the current (or most recent unreaped) session.
    pub fn session_state(&self) -> Option<SessionState> {
        self.active.as_ref().map(|a| a.status.get())
    }

    /// Send a free-form prompt with the latest frame.
    pub fn send(&mut self, prompt: &str) -> Result<SendOutcome> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Ok(SendOutcome::EmptyPrompt);
        }
        self.issue(prompt, self.config.capture.require_frame)
    }

    /// Ask for a review of the latest frame. Never sent without one.
    pub fn review(&mut self) -> Result<SendOutcome> {
        self.issue(REVIEW_PROMPT, true)
    }

    fn issue(&mut self, prompt: &str, require_frame: bool) -> Result<SendOutcome> {
        self.reap_finished();
        if let Some(ref active) = self.active {
            debug!(session = %active.id, "send rejected, session in progress");
            return Err(Error::SessionBusy);
        }

        let frame = self.mailbox.get();
        if frame.is_none() && require_frame {
            debug!("no frame captured yet, request not sent");
            return Ok(SendOutcome::NoFrame);
        }

        let id = SessionId(self.next_session);
        self.next_session += 1;

        let session = ChatSession::new(
            id,
            ChatRequest {
                prompt: prompt.to_string(),
                frame,
            },
        );
        let status = session.status();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let client = Arc::clone(&self.client);
        let events = self.events.clone();

        // Queued before the worker exists, so it precedes every chunk.
        self.events.post(UiEvent::SessionStarted {
            session: id,
            prompt: prompt.to_string(),
        });

        let spawned = thread::Builder::new()
            .name(format!("chat-session-{}", id.0))
            .spawn(move || {
                let _done = done_tx;
                session.run(client.as_ref(), &events);
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                // Keep the view's transcript consistent with what happened.
                self.events.post(UiEvent::SessionFailed {
                    session: id,
                    message: format!("Could not start chat session: {e}"),
                });
                return Err(Error::Io(e));
            }
        };

        self.active = Some(ActiveSession {
            id,
            status,
            done_rx,
            thread,
        });
        Ok(SendOutcome::Started(id))
    }

    /// Free the slot if its session has reached a terminal state or its
    /// thread has exited.
    fn reap_finished(&mut self) {
        let finished = self
            .active
            .as_ref()
            .is_some_and(|a| a.status.get().is_terminal() || a.thread.is_finished());
        if !finished {
            return;
        }
        if let Some(active) = self.active.take() {
            // Terminal state is published last, so the thread is on its way
            // out; this join is short.
            if active.thread.join().is_err() {
                warn!(session = %active.id, "session thread panicked");
            }
            if !active.status.get().is_terminal() {
                warn!(session = %active.id, "session exited without finishing");
                self.events.post(UiEvent::SessionFailed {
                    session: active.id,
                    message: "chat session ended unexpectedly".into(),
                });
                active.status.set(SessionState::Failed);
            }
            debug!(session = %active.id, "session reaped");
        }
    }

    /// Stop the sampler and wait for it, then give an in-flight session up
    /// to `session.shutdown_grace_secs` to finish. Safe to call twice.
    pub fn shutdown(&mut self) -> Result<()> {
        let mut result = Ok(());

        if let Some(sampler) = self.sampler.take() {
            let bound = self.config.capture.interval();
            if let Err(e) = sampler.join(bound) {
                result = Err(e);
            }
        }

        if let Some(active) = self.active.take() {
            let grace = self.config.session.shutdown_grace();
            if let Err(e) = settle_session(active, grace) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        info!("shutdown complete");
        result
    }
}

fn settle_session(active: ActiveSession, grace: Duration) -> Result<()> {
    if !active.status.get().is_terminal() {
        info!(session = %active.id, grace_ms = grace.as_millis() as u64, "waiting for in-flight session");
    }
    match active.done_rx.recv_timeout(grace) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
            if active.thread.join().is_err() {
                warn!(session = %active.id, "session thread panicked");
            }
            Ok(())
        }
        Err(RecvTimeoutError::Timeout) => {
            // Bounded by the HTTP read timeout; it ends with the process at
            // the latest.
            warn!(session = %active.id, "session still running at shutdown, abandoning it");
            Err(Error::ShutdownTimeout {
                component: "chat session",
                timeout: grace,
            })
        }
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        if self.sampler.is_some() || self.active.is_some() {
            let _ = self.shutdown();
        }
    }
}
