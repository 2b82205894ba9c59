//! Progress stream listener.
//!
//! The backend pushes newline-delimited progress text for a running job. On a
//! plain text stream every line is progress, blank lines included. On an
//! `text/event-stream` response only `data:` payloads are. A line that parses
//! as a JSON object with a terminal `status` is surfaced as a status update so
//! the tracker can finish without waiting for the next poll.

use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::backend::{AnalysisBackend, LineFraming};
use crate::error::JobError;
use crate::types::{ExecutionHandle, ExecutionStatus};

/// Something the listener observed on the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// One line of progress text, as delivered.
    Line(String),
    /// A terminal status pushed over the stream.
    Status(ExecutionStatus),
    /// The stream ended. `error` is set when it broke rather than finished.
    Closed { error: Option<JobError> },
}

fn strip_data_prefix(line: &str) -> &str {
    match line.strip_prefix("data:") {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => line,
    }
}

/// Classify one raw line.
///
/// Returns `None` only for event-stream framing lines: comments, `event:`,
/// `id:`, `retry:`, and blank separators. A leading `data: ` is unwrapped on
/// either framing.
pub fn classify_line(raw: &str, framing: LineFraming) -> Option<ProgressEvent> {
    let line = raw.trim_end_matches('\r');

    let text = match framing {
        LineFraming::Plain => strip_data_prefix(line),
        LineFraming::EventStream => {
            if line.starts_with(':')
                || line.starts_with("event:")
                || line.starts_with("id:")
                || line.starts_with("retry:")
            {
                return None;
            }
            let text = strip_data_prefix(line);
            if text.trim().is_empty() {
                return None;
            }
            text
        }
    };

    if text.trim_start().starts_with('{')
        && let Ok(value) = serde_json::from_str::<Value>(text)
        && value.get("status").is_some()
        && let Ok(status) = ExecutionStatus::from_payload(value)
        && status.is_terminal()
    {
        return Some(ProgressEvent::Status(status));
    }

    Some(ProgressEvent::Line(text.to_string()))
}

/// Splits a chunked byte stream into lines.
///
/// Bytes are buffered until a newline so a multi-byte character split across
/// chunks decodes correctly.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Return whatever is left after the stream ended without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Reads one job's progress stream and reports what it sees.
pub struct ProgressListener {
    backend: Arc<dyn AnalysisBackend>,
    handle: ExecutionHandle,
}

impl ProgressListener {
    pub fn new(backend: Arc<dyn AnalysisBackend>, handle: ExecutionHandle) -> Self {
        Self { backend, handle }
    }

    /// Run until the stream ends, breaks, delivers a terminal status, or
    /// `cancel` fires.
    ///
    /// `emit` receives events in stream order and returns `false` once nobody
    /// is listening, which stops the listener. A stream failure is reported as
    /// `Closed` with the error and never as a job failure. Cancellation emits
    /// nothing. The stream is dropped, and the connection closed, on return.
    pub async fn run<F>(self, cancel: CancellationToken, mut emit: F)
    where
        F: FnMut(ProgressEvent) -> bool + Send,
    {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            opened = self.backend.open_progress_stream(&self.handle) => opened,
        };
        let (framing, mut stream) = match opened {
            Ok(opened) => (opened.framing, opened.chunks),
            Err(err) => {
                warn!(execution_id = %self.handle, error = %err, "Progress stream failed to open");
                emit(ProgressEvent::Closed { error: Some(err) });
                return;
            }
        };
        debug!(execution_id = %self.handle, ?framing, "Progress stream open");

        let mut assembler = LineAssembler::new();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    trace!(execution_id = %self.handle, "Progress stream cancelled");
                    return;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    for line in assembler.push(&chunk) {
                        if deliver(&line, framing, &mut emit) == Some(true) {
                            return;
                        }
                    }
                }
                Some(Err(err)) => {
                    warn!(execution_id = %self.handle, error = %err, "Progress stream broke");
                    emit(ProgressEvent::Closed { error: Some(err) });
                    return;
                }
                None => {
                    if let Some(rest) = assembler.finish()
                        && deliver(&rest, framing, &mut emit) == Some(true)
                    {
                        return;
                    }
                    debug!(execution_id = %self.handle, "Progress stream ended");
                    emit(ProgressEvent::Closed { error: None });
                    return;
                }
            }
        }
    }
}

/// Emit one line. `Some(true)` means stop reading: either a terminal status was
/// delivered or the receiver is gone.
fn deliver<F>(line: &str, framing: LineFraming, emit: &mut F) -> Option<bool>
where
    F: FnMut(ProgressEvent) -> bool,
{
    let event = classify_line(line, framing)?;
    let terminal = matches!(event, ProgressEvent::Status(_));
    let alive = emit(event);
    Some(terminal || !alive)
}
