//! Controller-level behavior: startup, the single session slot, frame
//! handoff and shutdown.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{drain_until, quiet_config, wait_for, ChannelService, StaticSource};
use tutor::{
    event_channel, Activity, ChatRequest, Error, Fragments, LifecycleController, ModelService,
    SendOutcome, SessionState, Transcript, REVIEW_PROMPT,
};

fn controller_with_frames(
    service: Arc<ChannelService>,
) -> (LifecycleController, tutor::UiEventDispatcher, Transcript) {
    let mut config = quiet_config();
    config.capture.enabled = true;
    config.capture.interval_secs = 60;

    let (tx, mut dispatcher) = event_channel();
    let mut controller =
        LifecycleController::new(config, Arc::new(StaticSource::new()), service, tx);
    controller.startup().unwrap();

    let mut view = Transcript::default();
    drain_until(&mut dispatcher, &mut view, |v| v.frames_seen() == 1);
    (controller, dispatcher, view)
}

#[test]
fn streamed_reply_lands_in_order() {
    let service = Arc::new(ChannelService::default());
    let (mut controller, mut dispatcher, mut view) = controller_with_frames(service.clone());

    let stream = service.push_stream();
    let outcome = controller.send("How is my sketch?").unwrap();
    assert!(matches!(outcome, SendOutcome::Started(_)));

    for fragment in ["Hel", "lo, ", "world!"] {
        stream.send(Ok(fragment.to_string())).unwrap();
    }
    drop(stream);

    drain_until(&mut dispatcher, &mut view, |v| {
        v.activity() == &Activity::Ready && v.text().ends_with("\n\n")
    });
    assert_eq!(
        view.text(),
        "You: How is my sketch?\n\nAssistant: Hello, world!\n\n"
    );
    wait_for("completion", || {
        controller.session_state() == Some(SessionState::Completed)
    });

    let seen = service.requests.lock().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].prompt, "How is my sketch?");
    assert_eq!(seen[0].image.as_deref(), Some("cG5n0"));

    controller.shutdown().unwrap();
}

#[test]
fn second_send_while_streaming_is_busy() {
    let service = Arc::new(ChannelService::default());
    let (mut controller, mut dispatcher, mut view) = controller_with_frames(service.clone());

    let stream = service.push_stream();
    controller.send("first").unwrap();
    stream.send(Ok("a".into())).unwrap();
    wait_for("streaming", || {
        controller.session_state() == Some(SessionState::Streaming)
    });

    assert!(matches!(controller.send("second"), Err(Error::SessionBusy)));
    assert!(matches!(controller.review(), Err(Error::SessionBusy)));
    assert_eq!(service.request_count(), 1);

    stream.send(Ok("b".into())).unwrap();
    drop(stream);
    wait_for("completion", || {
        controller.session_state() == Some(SessionState::Completed)
    });
    drain_until(&mut dispatcher, &mut view, |v| v.text().ends_with("ab\n\n"));

    assert_eq!(view.text(), "You: first\n\nAssistant: ab\n\n");

    // The slot frees up once the session is done.
    let next = controller.send("third").unwrap();
    assert!(matches!(next, SendOutcome::Started(_)));
    controller.shutdown().unwrap();
}

#[test]
fn review_sends_fixed_prompt_with_frame() {
    let service = Arc::new(ChannelService::default());
    let (mut controller, mut dispatcher, mut view) = controller_with_frames(service.clone());

    assert!(matches!(controller.review().unwrap(), SendOutcome::Started(_)));
    drain_until(&mut dispatcher, &mut view, |v| {
        v.text().contains("Assistant") && v.text().ends_with("\n\n")
    });

    let seen = service.requests.lock().clone();
    assert_eq!(seen[0].prompt, REVIEW_PROMPT);
    assert!(seen[0].image.is_some());
    controller.shutdown().unwrap();
}

#[test]
fn review_without_frame_does_nothing() {
    let service = Arc::new(ChannelService::default());
    let (tx, mut dispatcher) = event_channel();
    let mut controller =
        LifecycleController::new(quiet_config(), Arc::new(StaticSource::new()), service.clone(), tx);
    controller.startup().unwrap();

    assert_eq!(controller.review().unwrap(), SendOutcome::NoFrame);
    assert_eq!(controller.send("hello").unwrap(), SendOutcome::NoFrame);

    let mut view = Transcript::default();
    assert_eq!(dispatcher.wait_and_drain(&mut view, Duration::from_millis(50)), 0);
    assert_eq!(service.request_count(), 0);
    assert_eq!(controller.session_state(), None);
}

#[test]
fn blank_prompt_is_ignored() {
    let service = Arc::new(ChannelService::default());
    let (mut controller, mut dispatcher, mut view) = controller_with_frames(service.clone());

    assert_eq!(controller.send("   \n").unwrap(), SendOutcome::EmptyPrompt);
    assert_eq!(dispatcher.drain(&mut view), 0);
    assert_eq!(service.request_count(), 0);
    controller.shutdown().unwrap();
}

#[test]
fn text_only_send_when_frames_not_required() {
    let service = Arc::new(ChannelService::default());
    let mut config = quiet_config();
    config.capture.require_frame = false;
    let (tx, mut dispatcher) = event_channel();
    let mut controller =
        LifecycleController::new(config, Arc::new(StaticSource::new()), service.clone(), tx);

    assert!(matches!(controller.send("no picture").unwrap(), SendOutcome::Started(_)));
    let mut view = Transcript::default();
    drain_until(&mut dispatcher, &mut view, |v| v.text().ends_with("Assistant: \n\n"));

    let seen = service.requests.lock().clone();
    assert_eq!(seen[0].image, None);
    wait_for("completion", || {
        controller.session_state() == Some(SessionState::Completed)
    });
    // Review still insists on a frame.
    assert_eq!(controller.review().unwrap(), SendOutcome::NoFrame);
}

#[test]
fn no_frames_after_shutdown() {
    let mut config = quiet_config();
    config.capture.enabled = true;
    config.capture.interval_secs = 1;
    let source = Arc::new(StaticSource::new());
    let (tx, mut dispatcher) = event_channel();
    let mut controller = LifecycleController::new(
        config,
        source.clone(),
        Arc::new(ChannelService::default()),
        tx,
    );
    controller.startup().unwrap();

    let mut view = Transcript::default();
    drain_until(&mut dispatcher, &mut view, |v| v.frames_seen() >= 1);
    controller.shutdown().unwrap();

    dispatcher.drain(&mut view);
    let frames = view.frames_seen();
    let captures = source.captures.load(std::sync::atomic::Ordering::SeqCst);

    thread::sleep(Duration::from_millis(1300));
    assert_eq!(dispatcher.drain(&mut view), 0);
    assert_eq!(view.frames_seen(), frames);
    assert_eq!(
        source.captures.load(std::sync::atomic::Ordering::SeqCst),
        captures
    );
}

#[test]
fn shutdown_lets_in_flight_session_finish() {
    let service = Arc::new(ChannelService::default());
    let (mut controller, mut dispatcher, mut view) = controller_with_frames(service.clone());

    let stream = service.push_stream();
    controller.send("slow one").unwrap();
    let feeder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        stream.send(Ok("finished".into())).unwrap();
    });

    controller.shutdown().unwrap();
    feeder.join().unwrap();

    dispatcher.drain(&mut view);
    assert!(view.text().ends_with("Assistant: finished\n\n"));
    assert_eq!(view.activity(), &Activity::Ready);
}

#[test]
fn shutdown_gives_up_on_session_after_grace() {
    let service = Arc::new(ChannelService::default());
    let (mut controller, _dispatcher, _view) = controller_with_frames(service.clone());

    let stream = service.push_stream();
    controller.send("never ends").unwrap();
    wait_for("request", || service.request_count() == 1);

    let err = controller.shutdown().unwrap_err();
    assert!(matches!(
        err,
        Error::ShutdownTimeout {
            component: "chat session",
            ..
        }
    ));
    // Second shutdown has nothing left to do.
    controller.shutdown().unwrap();
    drop(stream);
}

/// Panics on the first request, then answers normally.
struct PanicsOnce {
    calls: std::sync::atomic::AtomicUsize,
}

impl ModelService for PanicsOnce {
    fn generate(&self, _request: &ChatRequest) -> tutor::Result<Fragments> {
        if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
            panic!("client blew up");
        }
        Ok(Box::new(std::iter::once(Ok("recovered".to_string()))))
    }
}

#[test]
fn panicking_client_fails_session_and_frees_the_slot() {
    let mut config = quiet_config();
    config.capture.require_frame = false;
    let service = Arc::new(PanicsOnce {
        calls: std::sync::atomic::AtomicUsize::new(0),
    });
    let (tx, mut dispatcher) = event_channel();
    let mut controller =
        LifecycleController::new(config, Arc::new(StaticSource::new()), service, tx);

    controller.send("one").unwrap();
    let mut view = Transcript::default();
    drain_until(&mut dispatcher, &mut view, |v| v.text().ends_with("\n\n"));
    wait_for("failure", || {
        controller.session_state() == Some(SessionState::Failed)
    });

    assert!(view.text().starts_with("You: one\n\nAssistant: \n[error] "));
    assert!(view.text().contains("client blew up"));
    assert_eq!(view.text().matches("[error]").count(), 1);
    assert!(matches!(view.activity(), Activity::Error(_)));

    assert!(matches!(controller.send("two").unwrap(), SendOutcome::Started(_)));
    drain_until(&mut dispatcher, &mut view, |v| v.text().ends_with("recovered\n\n"));
    assert_eq!(view.activity(), &Activity::Ready);
    controller.shutdown().unwrap();
}
