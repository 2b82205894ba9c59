//! HTTP implementation of the analysis backend.
//!
//! Endpoints (relative to `base_url/api_prefix`):
//! - `POST inspect` (multipart `file`)
//! - `POST analyze` (multipart form)
//! - `GET results/{execution_id}`
//! - `GET realtime/{execution_id}` (long-lived text stream)

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::debug;

use super::{AnalysisBackend, LineFraming, ProgressStream};
use crate::config::BackendConfig;
use crate::error::JobError;
use crate::types::{AnalysisRequest, DatasetHandle, DatasetProfile, ExecutionHandle, ExecutionStatus};

/// Backend reached over HTTP with `reqwest`.
pub struct HttpBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpBackend {
    /// Create a backend client from configuration.
    ///
    /// Only a connect timeout is set on the client. Request timeouts are set
    /// per request so the progress stream can stay open indefinitely.
    pub fn new(config: &BackendConfig) -> Result<Self, JobError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| JobError::network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn dataset_part(dataset: &DatasetHandle) -> Part {
        Part::bytes(dataset.bytes().to_vec()).file_name(dataset.file_name().to_string())
    }

    /// Build the `analyze` form. Optional panel columns are sent as empty strings.
    pub fn analyze_form(request: &AnalysisRequest) -> Form {
        Form::new()
            .part("file", Self::dataset_part(request.dataset()))
            .text("dv_override", request.dependent().to_string())
            .text("predictor_override", request.predictor_override())
            .text("method", request.method().wire_name())
            .text("panel_id", request.panel_id().unwrap_or_default().to_string())
            .text("panel_time", request.panel_time().unwrap_or_default().to_string())
            .text("research_question", request.research_question().to_string())
            .text("report_type", request.report_type().to_string())
    }

    /// Check the status code and decode a JSON body.
    async fn read_json(response: reqwest::Response, context: &str) -> Result<Value, JobError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::backend(format!("{context} returned {status}: {body}")));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| JobError::backend(format!("{context} returned invalid JSON: {e}")))
    }
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    async fn inspect(&self, dataset: &DatasetHandle) -> Result<DatasetProfile, JobError> {
        let url = self.config.endpoint("inspect");
        debug!(url = %url, file = dataset.file_name(), bytes = dataset.len(), "Inspecting dataset");

        let form = Form::new().part("file", Self::dataset_part(dataset));
        let response = self
            .client
            .post(&url)
            .timeout(self.config.request_timeout())
            .multipart(form)
            .send()
            .await
            .map_err(|e| JobError::from_reqwest("Inspect request failed", e))?;

        let body = Self::read_json(response, "inspect").await?;
        serde_json::from_value(body)
            .map_err(|e| JobError::backend(format!("inspect response has unexpected shape: {e}")))
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<Value, JobError> {
        let url = self.config.endpoint("analyze");
        debug!(url = %url, method = request.method().wire_name(), "Submitting analysis");

        let response = self
            .client
            .post(&url)
            .timeout(self.config.request_timeout())
            .multipart(Self::analyze_form(request))
            .send()
            .await
            .map_err(|e| JobError::from_reqwest("Analyze request failed", e))?;

        Self::read_json(response, "analyze").await
    }

    async fn fetch_status(&self, handle: &ExecutionHandle) -> Result<ExecutionStatus, JobError> {
        let url = self.config.endpoint(&format!("results/{handle}"));
        let response = self
            .client
            .get(&url)
            .timeout(self.config.request_timeout())
            .send()
            .await
            .map_err(|e| JobError::from_reqwest("Status request failed", e))?;

        let body = Self::read_json(response, "results").await?;
        ExecutionStatus::from_payload(body)
    }

    async fn open_progress_stream(
        &self,
        handle: &ExecutionHandle,
    ) -> Result<ProgressStream, JobError> {
        let url = self.config.endpoint(&format!("realtime/{handle}"));
        debug!(url = %url, "Opening progress stream");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream, text/plain")
            .send()
            .await
            .map_err(|e| JobError::from_reqwest("Progress stream request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::backend(format!("realtime returned {status}: {body}")));
        }

        let framing = LineFraming::from_content_type(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        );
        debug!(url = %url, ?framing, "Progress stream connected");

        let chunks = response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| JobError::network(format!("Progress stream broke: {e}")))
            })
            .boxed();
        Ok(ProgressStream { framing, chunks })
    }

    fn name(&self) -> &str {
        "http"
    }
}
