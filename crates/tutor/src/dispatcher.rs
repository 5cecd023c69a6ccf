use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::session::{ChatChunk, SessionId};
use crate::state::Activity;

/// Everything background work can tell the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    FrameUpdated { captured_at: DateTime<Local> },
    SessionStarted { session: SessionId, prompt: String },
    ChunkAppended(ChatChunk),
    SessionCompleted { session: SessionId },
    SessionFailed { session: SessionId, message: String },
}

/// The visible state. Only ever touched on the thread that owns the
/// dispatcher.
pub trait View {
    /// Append text to the end of the chat display.
    fn append_text(&mut self, text: &str);

    fn frame_updated(&mut self, captured_at: DateTime<Local>);

    fn set_activity(&mut self, _activity: Activity) {}
}

/// Cloneable posting end. Safe to use from any thread.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<UiEvent>,
}

impl EventSender {
    /// Queue `event` for the view thread. Returns false once the dispatcher
    /// is gone; the event is dropped.
    pub fn post(&self, event: UiEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(err) => {
                debug!(event = ?err.into_inner(), "dispatcher closed, dropping event");
                false
            }
        }
    }
}

/// Create a connected sender/dispatcher pair.
pub fn event_channel() -> (EventSender, UiEventDispatcher) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        EventSender { tx },
        UiEventDispatcher {
            rx,
            last_seq: HashMap::new(),
        },
    )
}

/// Single consumer that applies queued events to a [`View`] in receipt order.
pub struct UiEventDispatcher {
    rx: Receiver<UiEvent>,
    /// Highest chunk index applied per live session.
    last_seq: HashMap<SessionId, u64>,
}

impl UiEventDispatcher {
    /// Apply everything queued right now. Returns how many events were
    /// applied.
    pub fn drain(&mut self, view: &mut dyn View) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.rx.try_recv() {
            if self.apply(event, view) {
                applied += 1;
            }
        }
        applied
    }

    /// Block up to `timeout` for the first event, then drain the rest.
    pub fn wait_and_drain(&mut self, view: &mut dyn View, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => {
                let first = usize::from(self.apply(event, view));
                first + self.drain(view)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Everything still queued, without applying it.
    #[cfg(test)]
    pub(crate) fn into_events(self) -> Vec<UiEvent> {
        self.rx.try_iter().collect()
    }

    fn apply(&mut self, event: UiEvent, view: &mut dyn View) -> bool {
        match event {
            UiEvent::FrameUpdated { captured_at } => {
                view.frame_updated(captured_at);
            }
            UiEvent::SessionStarted { session, prompt } => {
                self.last_seq.remove(&session);
                view.append_text(&format!("You: {prompt}\n\nAssistant: "));
                view.set_activity(Activity::Streaming);
            }
            UiEvent::ChunkAppended(chunk) => {
                if let Some(&last) = self.last_seq.get(&chunk.session) {
                    if chunk.seq <= last {
                        warn!(
                            session = %chunk.session,
                            seq = chunk.seq,
                            last,
                            "out-of-order chunk dropped"
                        );
                        return false;
                    }
                }
                self.last_seq.insert(chunk.session, chunk.seq);
                view.append_text(&chunk.text);
            }
            UiEvent::SessionCompleted { session } => {
                self.last_seq.remove(&session);
                view.append_text("\n\n");
                view.set_activity(Activity::Ready);
            }
            UiEvent::SessionFailed { session, message } => {
                self.last_seq.remove(&session);
                view.append_text(&format!("\n[error] {message}\n\n"));
                view.set_activity(Activity::Error(message));
            }
        }
        true
    }
}
