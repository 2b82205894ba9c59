//! Job submission: validate a request, send it once, and extract the handle.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::AnalysisBackend;
use crate::error::JobError;
use crate::types::{AnalysisRequest, ExecutionHandle};

/// Submits analysis requests to a backend.
///
/// Submission never retries. A failure of any kind leaves no job behind on the
/// client side.
#[derive(Clone)]
pub struct JobSubmitter {
    backend: Arc<dyn AnalysisBackend>,
}

impl JobSubmitter {
    pub fn new(backend: Arc<dyn AnalysisBackend>) -> Self {
        Self { backend }
    }

    /// Validate `request` and submit it.
    ///
    /// Validation failures return before any network call. Otherwise exactly
    /// one `analyze` request is made.
    pub async fn submit(&self, request: &AnalysisRequest) -> Result<ExecutionHandle, JobError> {
        request.validate()?;

        info!(
            backend = self.backend.name(),
            method = request.method().wire_name(),
            dependent = request.dependent(),
            predictors = request.predictors().len(),
            "Submitting analysis job"
        );

        let body = self.backend.analyze(request).await?;
        let handle = extract_handle(&body)?;
        debug!(execution_id = %handle, "Job accepted");
        Ok(handle)
    }
}

/// Pull the execution id out of an `analyze` success body.
///
/// Accepts a string or integer `execution_id`; anything else, including an
/// empty string, is a backend contract error.
pub fn extract_handle(body: &Value) -> Result<ExecutionHandle, JobError> {
    let id = match body.get("execution_id") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if id.is_empty() {
        let detail = body
            .get("detail")
            .or_else(|| body.get("error"))
            .map(|d| d.to_string())
            .unwrap_or_else(|| body.to_string());
        return Err(JobError::backend(format!(
            "analyze response has no execution_id: {detail}"
        )));
    }
    Ok(ExecutionHandle::new(id))
}
