use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use crossbeam_channel::{Sender, TryRecvError};
use tracing::{info, warn};
use tutor::config::Config;
use tutor::logging;
use tutor::{
    event_channel, Activity, DesktopCapture, Error, LifecycleController, OllamaClient,
    SendOutcome, View,
};

/// How long the view loop waits for events before checking input again.
const FRAME_BUDGET: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "art-tutor", about = "AI Art Tutor -- drawing feedback from a local model that watches your screen")]
struct Cli {
    /// Path to config.toml (defaults to config.toml next to this exe)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Chat display on stdout. Owned by the main thread.
struct ConsoleView {
    out: io::Stdout,
    activity: Activity,
    last_frame: Option<DateTime<Local>>,
}

impl ConsoleView {
    fn new() -> Self {
        Self {
            out: io::stdout(),
            activity: Activity::Ready,
            last_frame: None,
        }
    }

    fn notice(&mut self, text: &str) {
        self.append_text(&format!("({text})\n"));
    }
}

impl View for ConsoleView {
    fn append_text(&mut self, text: &str) {
        let mut out = self.out.lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn frame_updated(&mut self, captured_at: DateTime<Local>) {
        self.last_frame = Some(captured_at);
    }

    fn set_activity(&mut self, activity: Activity) {
        self.activity = activity;
    }
}

enum Input {
    Line(String),
    Closed,
}

/// Read prompts from stdin until `/quit` or end of input.
fn spawn_reader(tx: Sender<Input>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim() == "/quit" {
                    break;
                }
                if tx.send(Input::Line(line)).is_err() {
                    return;
                }
            }
            let _ = tx.send(Input::Closed);
        })
}

fn handle_line(controller: &mut LifecycleController, line: &str, view: &mut ConsoleView) {
    let result = match line.trim() {
        "/review" => controller.review(),
        "/status" => {
            let frame = match view.last_frame {
                Some(at) => format!("last screenshot {}", at.format("%H:%M:%S")),
                None => "no screenshot yet".to_string(),
            };
            let status = format!("{} | {frame}", view.activity);
            view.notice(&status);
            return;
        }
        prompt => controller.send(prompt),
    };

    match result {
        Ok(SendOutcome::Started(id)) => info!(session = %id, "request sent"),
        Ok(SendOutcome::NoFrame) => view.notice("no screenshot captured yet, try again in a moment"),
        Ok(SendOutcome::EmptyPrompt) => {}
        Err(Error::SessionBusy) => view.notice("still answering the previous message"),
        Err(e) => {
            warn!(error = %e, "request failed to start");
            view.notice(&format!("could not send: {e}"));
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());
    logging::init_tracing(&config.logging);
    info!(model = %config.model.model, endpoint = %config.model.endpoint, "art-tutor starting");

    let client = OllamaClient::new(&config.model).context("Failed to create model client")?;
    let source = DesktopCapture::new(config.capture.max_width);
    let (events, mut dispatcher) = event_channel();
    let mut controller =
        LifecycleController::new(config, Arc::new(source), Arc::new(client), events);
    controller
        .startup()
        .context("Failed to start the screenshot sampler")?;

    let mut view = ConsoleView::new();
    view.append_text(
        "AI Art Tutor. Type a message and press Enter. \
         /review asks for feedback on your drawing, /status shows state, /quit exits.\n\n",
    );

    let (input_tx, input_rx) = crossbeam_channel::unbounded();
    let reader = spawn_reader(input_tx).context("Failed to start input reader")?;

    loop {
        match input_rx.try_recv() {
            Ok(Input::Line(line)) => handle_line(&mut controller, &line, &mut view),
            Ok(Input::Closed) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }
        dispatcher.wait_and_drain(&mut view, FRAME_BUDGET);
    }

    view.notice("shutting down");
    if let Err(e) = controller.shutdown() {
        warn!(error = %e, "shutdown was not clean");
        eprintln!("Warning: {e}");
    }
    dispatcher.drain(&mut view);
    let _ = reader.join();
    info!("art-tutor exited");
    Ok(())
}
