//! Scripted in-memory backend for tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{AnalysisBackend, ChunkStream, LineFraming, ProgressStream};
use crate::error::JobError;
use crate::types::{AnalysisRequest, DatasetHandle, DatasetProfile, ExecutionHandle, ExecutionStatus};

/// One scripted step of a mock progress stream.
#[derive(Debug, Clone)]
pub enum StreamStep {
    /// Emit this text as one chunk.
    Chunk(String),
    /// Wait before the next step (uses tokio time, so paused clocks apply).
    Delay(Duration),
    /// Fail the stream with a network error, then end it.
    Fail(String),
    /// End the stream cleanly.
    End,
}

impl StreamStep {
    pub fn chunk(text: impl Into<String>) -> Self {
        StreamStep::Chunk(text.into())
    }

    pub fn delay_ms(ms: u64) -> Self {
        StreamStep::Delay(Duration::from_millis(ms))
    }
}

/// A call observed by the mock, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Inspect { file_name: String },
    Analyze { method: String, dependent: String, predictors: Vec<String> },
    FetchStatus { handle: String },
    OpenStream { handle: String },
}

/// Mock backend with queued responses.
///
/// - `analyze` pops a queued response, or answers `{"execution_id": "exec-N"}`.
/// - `fetch_status` pops a queued status, or answers `running`.
/// - `open_progress_stream` plays one queued script as plain text lines, or as
///   an event stream when queued with `queue_event_stream`. A script without a
///   final `End` or `Fail` stays open until the stream is dropped.
pub struct MockBackend {
    profile: Mutex<Option<DatasetProfile>>,
    analyze_responses: Mutex<VecDeque<Result<Value, JobError>>>,
    statuses: Mutex<VecDeque<Result<ExecutionStatus, JobError>>>,
    streams: Mutex<VecDeque<Result<(LineFraming, Vec<StreamStep>), JobError>>>,
    calls: Mutex<Vec<BackendCall>>,
    analyze_count: AtomicUsize,
    streams_opened: AtomicUsize,
    streams_closed: Arc<AtomicUsize>,
    chunks_sent: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            profile: Mutex::new(None),
            analyze_responses: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            analyze_count: AtomicUsize::new(0),
            streams_opened: AtomicUsize::new(0),
            streams_closed: Arc::new(AtomicUsize::new(0)),
            chunks_sent: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_profile(self, profile: DatasetProfile) -> Self {
        *self.profile.lock().unwrap() = Some(profile);
        self
    }

    /// Queue the body (or error) returned by the next `analyze` call.
    pub fn queue_analyze(&self, response: Result<Value, JobError>) {
        self.analyze_responses.lock().unwrap().push_back(response);
    }

    /// Queue the result of the next `fetch_status` call.
    pub fn queue_status(&self, status: Result<ExecutionStatus, JobError>) {
        self.statuses.lock().unwrap().push_back(status);
    }

    /// Queue a status payload, interpreted the same way the HTTP backend does.
    pub fn queue_status_payload(&self, payload: Value) {
        self.queue_status(ExecutionStatus::from_payload(payload));
    }

    /// Queue the script for the next opened stream, served as plain text.
    pub fn queue_stream(&self, steps: Vec<StreamStep>) {
        self.streams
            .lock()
            .unwrap()
            .push_back(Ok((LineFraming::Plain, steps)));
    }

    /// Queue a script served as `text/event-stream`.
    pub fn queue_event_stream(&self, steps: Vec<StreamStep>) {
        self.streams
            .lock()
            .unwrap()
            .push_back(Ok((LineFraming::EventStream, steps)));
    }

    /// Make the next stream open fail.
    pub fn fail_next_stream(&self, error: JobError) {
        self.streams.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_count.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, BackendCall::FetchStatus { .. }))
            .count()
    }

    /// Status polls made for one handle.
    pub fn status_calls_for(&self, handle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, BackendCall::FetchStatus { handle: h } if h == handle))
            .count()
    }

    pub fn streams_opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }

    pub fn streams_closed(&self) -> usize {
        self.streams_closed.load(Ordering::SeqCst)
    }

    /// Queued statuses not yet handed out by `fetch_status`.
    pub fn pending_statuses(&self) -> usize {
        self.statuses.lock().unwrap().len()
    }

    /// Chunks delivered across every stream.
    pub fn chunks_sent(&self) -> usize {
        self.chunks_sent.load(Ordering::SeqCst)
    }

    /// Streams opened and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.streams_opened() - self.streams_closed()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts a stream as closed when the stream (and this guard with it) is dropped.
struct CloseGuard(Arc<AtomicUsize>);

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn scripted_stream(
    steps: Vec<StreamStep>,
    guard: CloseGuard,
    sent: Arc<AtomicUsize>,
) -> ChunkStream {
    futures::stream::unfold(
        (VecDeque::from(steps), guard, sent),
        |(mut steps, guard, sent)| async move {
            loop {
                match steps.pop_front() {
                    Some(StreamStep::Chunk(text)) => {
                        sent.fetch_add(1, Ordering::SeqCst);
                        return Some((Ok(Bytes::from(text)), (steps, guard, sent)));
                    }
                    Some(StreamStep::Delay(d)) => tokio::time::sleep(d).await,
                    Some(StreamStep::Fail(message)) => {
                        steps.clear();
                        steps.push_back(StreamStep::End);
                        return Some((Err(JobError::network(message)), (steps, guard, sent)));
                    }
                    Some(StreamStep::End) => return None,
                    None => futures::future::pending::<()>().await,
                }
            }
        },
    )
    .boxed()
}

#[async_trait]
impl AnalysisBackend for MockBackend {
    async fn inspect(&self, dataset: &DatasetHandle) -> Result<DatasetProfile, JobError> {
        self.record(BackendCall::Inspect {
            file_name: dataset.file_name().to_string(),
        });
        self.profile
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| JobError::backend("no profile configured"))
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<Value, JobError> {
        let n = self.analyze_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(BackendCall::Analyze {
            method: request.method().wire_name().to_string(),
            dependent: request.dependent().to_string(),
            predictors: request.predictors().to_vec(),
        });
        self.analyze_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({"execution_id": format!("exec-{n}")})))
    }

    async fn fetch_status(&self, handle: &ExecutionHandle) -> Result<ExecutionStatus, JobError> {
        self.record(BackendCall::FetchStatus {
            handle: handle.to_string(),
        });
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ExecutionStatus::running()))
    }

    async fn open_progress_stream(
        &self,
        handle: &ExecutionHandle,
    ) -> Result<ProgressStream, JobError> {
        self.record(BackendCall::OpenStream {
            handle: handle.to_string(),
        });
        let (framing, script) = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok((LineFraming::Plain, Vec::new())))?;
        self.streams_opened.fetch_add(1, Ordering::SeqCst);
        Ok(ProgressStream {
            framing,
            chunks: scripted_stream(
                script,
                CloseGuard(self.streams_closed.clone()),
                self.chunks_sent.clone(),
            ),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
