use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::capture::Frame;
use crate::config::ModelConfig;
use crate::error::{Error, Result};

/// Prompt sent by the review action.
pub const REVIEW_PROMPT: &str = "Please review my current drawing progress. Focus on: \
1. Shape accuracy and proportions \
2. Line quality \
3. Shading technique and consistency \
4. Light source positioning. \
Provide specific feedback and suggestions for improvement.";

/// One prompt, optionally with the frame it is about.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    pub frame: Option<Arc<Frame>>,
}

/// Lazy, finite, single-use sequence of response fragments. Each `next`
/// may block on the network. `Err(MalformedChunk)` items can be skipped;
/// any other error ends the response.
pub type Fragments = Box<dyn Iterator<Item = Result<String>> + Send>;

/// A model-serving endpoint that answers a prompt with text fragments.
pub trait ModelService: Send + Sync {
    /// Issue the request. Fails with `ServiceUnavailable` if the service
    /// cannot be reached or answers with a non-success status.
    fn generate(&self, request: &ChatRequest) -> Result<Fragments>;
}

// --- Ollama /api/generate wire format ---

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<&'a str>,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateChunk {
    response: Option<String>,
    error: Option<String>,
}

/// Longest NDJSON line accepted before the line is dropped as malformed.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Decode one response object. `Ok(None)` means a valid but empty fragment
/// (the closing `done` line of a stream). Invalid UTF-8 is malformed.
fn parse_fragment(line: &[u8]) -> Result<Option<String>> {
    let chunk: GenerateChunk = serde_json::from_slice(line)
        .map_err(|e| Error::MalformedChunk(format!("{e}: {}", preview(line))))?;

    if let Some(err) = chunk.error {
        return Err(Error::ServiceUnavailable(format!("Model service error: {err}")));
    }
    match chunk.response {
        Some(text) if text.is_empty() => Ok(None),
        Some(text) => Ok(Some(text)),
        None => Err(Error::MalformedChunk(format!(
            "missing `response` field: {}",
            preview(line)
        ))),
    }
}

fn preview(line: &[u8]) -> String {
    let head = &line[..line.len().min(80)];
    String::from_utf8_lossy(head).into_owned()
}

fn trim_line(raw: &[u8]) -> &[u8] {
    let start = raw.iter().position(|b| !b.is_ascii_whitespace());
    let end = raw.iter().rposition(|b| !b.is_ascii_whitespace());
    match (start, end) {
        (Some(start), Some(end)) => &raw[start..=end],
        _ => &[],
    }
}

fn status_message(status: StatusCode, model: &str, body: &str) -> String {
    let base = match status.as_u16() {
        404 => format!("Model '{model}' not found. Pull it into Ollama first."),
        500 | 503 => format!("Model service error (HTTP {}). Try again.", status.as_u16()),
        code => format!("Model service error (HTTP {code})."),
    };
    let detail = serde_json::from_str::<GenerateChunk>(body)
        .ok()
        .and_then(|c| c.error);
    match detail {
        Some(detail) => format!("{base} {detail}"),
        None => base,
    }
}

/// Splits a byte stream into trimmed, non-empty lines of raw bytes.
struct LineReader<S> {
    stream: S,
    buffer: Vec<u8>,
    finished: bool,
    /// Dropping the rest of an oversized line up to its newline.
    skipping: bool,
}

impl<S, B, E> LineReader<S>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            finished: false,
            skipping: false,
        }
    }

    async fn next_line(&mut self) -> Option<Result<Vec<u8>>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
                if std::mem::take(&mut self.skipping) {
                    continue;
                }
                let line = trim_line(&raw);
                if line.is_empty() {
                    continue;
                }
                return Some(Ok(line.to_vec()));
            }

            if self.buffer.len() > MAX_LINE_BYTES {
                self.buffer.clear();
                if !std::mem::replace(&mut self.skipping, true) {
                    return Some(Err(Error::MalformedChunk(format!(
                        "line longer than {MAX_LINE_BYTES} bytes"
                    ))));
                }
            }

            if self.finished {
                // Last line without a trailing newline.
                let raw = std::mem::take(&mut self.buffer);
                if self.skipping {
                    return None;
                }
                let line = trim_line(&raw);
                return (!line.is_empty()).then(|| Ok(line.to_vec()));
            }

            match self.stream.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(bytes.as_ref()),
                Some(Err(e)) => {
                    self.finished = true;
                    self.buffer.clear();
                    return Some(Err(Error::ServiceUnavailable(format!(
                        "Connection to model service lost: {e}"
                    ))));
                }
                None => self.finished = true,
            }
        }
    }
}

/// Pulls newline-delimited JSON fragments, blocking the caller on the
/// client's runtime for each line.
struct StreamedFragments<S> {
    runtime: Arc<Runtime>,
    lines: LineReader<S>,
}

impl<S, B, E> Iterator for StreamedFragments<S>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.runtime.block_on(self.lines.next_line())?;
            match line.and_then(|l| parse_fragment(&l)) {
                Ok(Some(text)) => return Some(Ok(text)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Client for a local Ollama server's `/api/generate`.
///
/// Owns a small tokio runtime so callers can stay on plain threads.
pub struct OllamaClient {
    http: reqwest::Client,
    runtime: Arc<Runtime>,
    endpoint: String,
    model: String,
    stream: bool,
}

impl OllamaClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("tutor-http")
            .enable_all()
            .build()?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .build()
            .map_err(|e| Error::ServiceUnavailable(format!("Could not build HTTP client: {e}")))?;

        Ok(Self {
            http,
            runtime: Arc::new(runtime),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            stream: config.stream,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        let message = if e.is_timeout() {
            "Model service timed out. Is it running?".to_string()
        } else if e.is_connect() {
            format!(
                "Cannot connect to model service at {}. Is Ollama running?",
                self.endpoint
            )
        } else {
            format!("Model service error: {e}")
        };
        Error::ServiceUnavailable(message)
    }
}

impl ModelService for OllamaClient {
    fn generate(&self, request: &ChatRequest) -> Result<Fragments> {
        // reqwest arms its timeout timers when the request is built, so that
        // has to happen inside the client's runtime.
        let _rt = self.runtime.enter();

        let body = GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            images: request
                .frame
                .as_deref()
                .map(|f| vec![f.png_base64()])
                .unwrap_or_default(),
            stream: self.stream,
        };

        debug!(
            endpoint = %self.endpoint,
            model = %self.model,
            with_image = !body.images.is_empty(),
            stream = self.stream,
            "sending generate request"
        );

        let response = self
            .runtime
            .block_on(
                self.http
                    .post(&self.endpoint)
                    .header("content-type", "application/json")
                    .json(&body)
                    .send(),
            )
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = self.runtime.block_on(response.text()).unwrap_or_default();
            return Err(Error::ServiceUnavailable(status_message(
                status,
                &self.model,
                &body,
            )));
        }

        if self.stream {
            Ok(Box::new(StreamedFragments {
                runtime: Arc::clone(&self.runtime),
                lines: LineReader::new(Box::pin(response.bytes_stream())),
            }))
        } else {
            let bytes = self
                .runtime
                .block_on(response.bytes())
                .map_err(|e| self.transport_error(e))?;
            let fragment = parse_fragment(trim_line(&bytes)).transpose();
            Ok(Box::new(fragment.into_iter()))
        }
    }
}
