use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{after, select, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::capture::ScreenshotSource;
use crate::dispatcher::{EventSender, UiEvent};
use crate::error::{Error, Result};
use crate::mailbox::FrameMailbox;

/// Periodically captures the screen into a [`FrameMailbox`] and tells the
/// view each time a new frame lands.
pub struct ScreenshotSampler {
    source: Arc<dyn ScreenshotSource>,
    mailbox: FrameMailbox,
    events: EventSender,
}

impl ScreenshotSampler {
    pub fn new(
        source: Arc<dyn ScreenshotSource>,
        mailbox: FrameMailbox,
        events: EventSender,
    ) -> Self {
        Self {
            source,
            mailbox,
            events,
        }
    }

    /// Spawn the sampling thread. The first capture happens right away, then
    /// one every `interval` until the handle is stopped.
    pub fn start(self, interval: Duration) -> Result<SamplerHandle> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let publishing = Arc::new(Mutex::new(true));

        let gate = Arc::clone(&publishing);
        let thread = thread::Builder::new()
            .name("frame-sampler".into())
            .spawn(move || {
                // Dropped on exit, which is what `done_rx` waits for.
                let _done = done_tx;
                self.run(interval, &stop_rx, &gate);
            })?;

        info!(interval_ms = interval.as_millis() as u64, "sampler started");
        Ok(SamplerHandle {
            stop_tx: Some(stop_tx),
            done_rx,
            publishing,
            thread: Some(thread),
        })
    }

    fn run(&self, interval: Duration, stop_rx: &Receiver<()>, publishing: &Mutex<bool>) {
        loop {
            if matches!(stop_rx.try_recv(), Err(TryRecvError::Disconnected)) {
                break;
            }
            self.sample_once(publishing);

            select! {
                recv(stop_rx) -> _ => break,
                recv(after(interval)) -> _ => {}
            }
        }
        debug!("sampler loop exited");
    }

    fn sample_once(&self, publishing: &Mutex<bool>) {
        let frame = match self.source.capture() {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!(error = %e, "capture failed, skipping tick");
                return;
            }
        };

        // Publishing under the gate means a stop can never race a late
        // FrameUpdated past it.
        let open = publishing.lock();
        if !*open {
            debug!("sampler stopped mid-capture, discarding frame");
            return;
        }
        let captured_at = frame.captured_at();
        self.mailbox.set(frame);
        self.events.post(UiEvent::FrameUpdated { captured_at });
    }
}

/// Owner's handle on a running sampler thread.
pub struct SamplerHandle {
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    publishing: Arc<Mutex<bool>>,
    thread: Option<JoinHandle<()>>,
}

impl SamplerHandle {
    /// Ask the loop to exit. Takes effect at the next tick boundary; from
    /// this call on no frame is published.
    pub fn stop(&mut self) {
        *self.publishing.lock() = false;
        if self.stop_tx.take().is_some() {
            debug!("sampler stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop and wait up to `timeout` for the thread to exit. On timeout the
    /// thread is left behind, already cut off from the mailbox and the
    /// event queue.
    pub fn join(mut self, timeout: Duration) -> Result<()> {
        self.stop();
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        match self.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                if thread.join().is_err() {
                    warn!("sampler thread panicked");
                }
                info!("sampler stopped");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "sampler did not stop in time, abandoning it");
                Err(Error::ShutdownTimeout {
                    component: "screenshot sampler",
                    timeout,
                })
            }
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
