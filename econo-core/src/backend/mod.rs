//! Backend abstraction for the remote analysis service.
//!
//! The `AnalysisBackend` trait covers the four endpoints the client talks to.
//! `HttpBackend` speaks JSON over HTTP; `MockBackend` is a scripted in-memory
//! stand-in for tests.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::JobError;
use crate::types::{AnalysisRequest, DatasetHandle, DatasetProfile, ExecutionHandle, ExecutionStatus};

pub use http::HttpBackend;
pub use mock::{BackendCall, MockBackend, StreamStep};

/// Raw chunks of the progress stream, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<Bytes, JobError>>;

/// How lines on a progress stream are framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineFraming {
    /// One progress message per line, delivered verbatim.
    #[default]
    Plain,
    /// `text/event-stream`: comments, control fields, and blank separator
    /// lines carry no progress text.
    EventStream,
}

impl LineFraming {
    /// Pick the framing from a response `Content-Type`.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct)
                if ct
                    .split(';')
                    .next()
                    .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/event-stream")) =>
            {
                LineFraming::EventStream
            }
            _ => LineFraming::Plain,
        }
    }
}

/// An open progress stream. Dropping it closes the connection.
pub struct ProgressStream {
    pub framing: LineFraming,
    pub chunks: ChunkStream,
}

/// Trait for the remote analysis backend.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Upload a dataset for column inspection.
    async fn inspect(&self, dataset: &DatasetHandle) -> Result<DatasetProfile, JobError>;

    /// Submit an analysis job. Returns the success body, which should carry
    /// an `execution_id`. Exactly one outbound request per call.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<Value, JobError>;

    /// Fetch the current status of a submitted job.
    async fn fetch_status(&self, handle: &ExecutionHandle) -> Result<ExecutionStatus, JobError>;

    /// Open the push stream of progress text for a job. Dropping the returned
    /// stream closes the connection.
    async fn open_progress_stream(
        &self,
        handle: &ExecutionHandle,
    ) -> Result<ProgressStream, JobError>;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;
}
