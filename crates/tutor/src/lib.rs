//! Core of the art tutor: a periodic screen sampler, a one-at-a-time chat
//! session against a local model service, and the dispatcher that feeds
//! both into a single-threaded view.

pub mod api;
pub mod capture;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod mailbox;
pub mod sampler;
pub mod session;
pub mod state;

pub use api::{ChatRequest, Fragments, ModelService, OllamaClient, REVIEW_PROMPT};
pub use capture::{DesktopCapture, Frame, ScreenshotSource};
pub use config::Config;
pub use dispatcher::{event_channel, EventSender, UiEvent, UiEventDispatcher, View};
pub use error::{Error, Result};
pub use lifecycle::{LifecycleController, SendOutcome};
pub use mailbox::FrameMailbox;
pub use session::{ChatChunk, SessionId, SessionState};
pub use state::{Activity, Transcript};
