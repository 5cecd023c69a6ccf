#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tutor::{
    ChatRequest, Config, Fragments, Frame, ModelService, Result, ScreenshotSource, Transcript,
    UiEventDispatcher,
};

/// Returns the same small frame on every tick.
pub struct StaticSource {
    pub captures: AtomicUsize,
}

impl StaticSource {
    pub fn new() -> Self {
        Self {
            captures: AtomicUsize::new(0),
        }
    }
}

impl ScreenshotSource for StaticSource {
    fn capture(&self) -> Result<Frame> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(Frame::new(format!("cG5n{n}")))
    }
}

/// What the service was asked.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub prompt: String,
    pub image: Option<String>,
}

/// Model service whose fragments are fed by the test through a channel, one
/// channel per request in the order they were queued.
#[derive(Default)]
pub struct ChannelService {
    streams: Mutex<VecDeque<Receiver<Result<String>>>>,
    pub requests: Mutex<Vec<SeenRequest>>,
}

impl ChannelService {
    /// Queue the fragment stream for the next request.
    pub fn push_stream(&self) -> Sender<Result<String>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.streams.lock().push_back(rx);
        tx
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl ModelService for ChannelService {
    fn generate(&self, request: &ChatRequest) -> Result<Fragments> {
        self.requests.lock().push(SeenRequest {
            prompt: request.prompt.clone(),
            image: request.frame.as_ref().map(|f| f.png_base64().to_string()),
        });
        match self.streams.lock().pop_front() {
            Some(rx) => Ok(Box::new(rx.into_iter())),
            None => Ok(Box::new(std::iter::empty())),
        }
    }
}

/// Config with the sampler off and a short shutdown grace.
pub fn quiet_config() -> Config {
    let mut config = Config::default();
    config.capture.enabled = false;
    config.session.shutdown_grace_secs = 2;
    config.logging.enabled = false;
    config
}

/// Drain into `view` until `done` holds, or panic after five seconds.
pub fn drain_until(
    dispatcher: &mut UiEventDispatcher,
    view: &mut Transcript,
    done: impl Fn(&Transcript) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(view) {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for view, text so far: {:?}",
            view.text()
        );
        dispatcher.wait_and_drain(view, Duration::from_millis(50));
    }
}

/// Poll `check` until true, or panic after five seconds.
pub fn wait_for(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}
