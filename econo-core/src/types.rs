//! Core types for analysis requests and job status.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::error::JobError;

/// Estimation method requested from the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "ols")]
    Ols,
    #[serde(rename = "panel_fe")]
    FixedEffects,
    #[serde(rename = "panel_re")]
    RandomEffects,
    /// Fixed and random effects fitted together, plus the Hausman test.
    #[default]
    #[serde(rename = "panel_hausman")]
    Hausman,
    #[serde(rename = "panel_ab")]
    ArellanoBondGmm,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Ols,
        Method::FixedEffects,
        Method::RandomEffects,
        Method::Hausman,
        Method::ArellanoBondGmm,
    ];

    /// The value sent in the `method` form field.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Method::Ols => "ols",
            Method::FixedEffects => "panel_fe",
            Method::RandomEffects => "panel_re",
            Method::Hausman => "panel_hausman",
            Method::ArellanoBondGmm => "panel_ab",
        }
    }

    /// Panel-family methods need both an entity and a time column.
    pub fn is_panel(&self) -> bool {
        !matches!(self, Method::Ols)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Ols => write!(f, "OLS"),
            Method::FixedEffects => write!(f, "Fixed Effects"),
            Method::RandomEffects => write!(f, "Random Effects"),
            Method::Hausman => write!(f, "Hausman Test"),
            Method::ArellanoBondGmm => write!(f, "Arellano-Bond GMM"),
        }
    }
}

impl std::str::FromStr for Method {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "ols" => Ok(Method::Ols),
            "panel_fe" | "fe" | "fixed_effects" => Ok(Method::FixedEffects),
            "panel_re" | "re" | "random_effects" => Ok(Method::RandomEffects),
            "panel_hausman" | "hausman" => Ok(Method::Hausman),
            "panel_ab" | "ab" | "gmm" | "arellano_bond" => Ok(Method::ArellanoBondGmm),
            _ => Err(JobError::validation(format!("unknown method '{s}'"))),
        }
    }
}

/// An uploaded dataset: file name plus its contents.
///
/// Immutable once created; cloning shares the underlying buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetHandle {
    file_name: String,
    bytes: Bytes,
}

impl DatasetHandle {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a dataset from disk.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset.csv".to_string());
        Ok(Self::new(file_name, bytes))
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Column metadata returned by the `inspect` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetProfile {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub auto_dependent_variable: String,
    #[serde(default)]
    pub suggested_predictors: Vec<String>,
    #[serde(default)]
    pub auto_id_candidates: Vec<String>,
    #[serde(default)]
    pub auto_time_candidates: Vec<String>,
}

/// Everything needed to submit one analysis job.
///
/// The predictor list is an ordered set that never contains the dependent
/// variable; both constructors enforce this.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    dataset: DatasetHandle,
    dependent: String,
    predictors: Vec<String>,
    method: Method,
    panel_id: Option<String>,
    panel_time: Option<String>,
    research_question: String,
    report_type: String,
}

impl AnalysisRequest {
    pub fn new<I, S>(
        dataset: DatasetHandle,
        dependent: impl Into<String>,
        predictors: I,
        method: Method,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dependent = dependent.into().trim().to_string();
        Self {
            dataset,
            predictors: clean_predictors(&dependent, predictors),
            dependent,
            method,
            panel_id: None,
            panel_time: None,
            research_question: String::new(),
            report_type: "executive".to_string(),
        }
    }

    /// Pre-fill dependent variable and predictors from an inspection profile.
    pub fn from_profile(dataset: DatasetHandle, profile: &DatasetProfile, method: Method) -> Self {
        Self::new(
            dataset,
            profile.auto_dependent_variable.clone(),
            profile.suggested_predictors.iter().cloned(),
            method,
        )
    }

    pub fn with_panel(mut self, id: impl Into<String>, time: impl Into<String>) -> Self {
        self.panel_id = non_blank(id.into());
        self.panel_time = non_blank(time.into());
        self
    }

    pub fn with_panel_id(mut self, id: impl Into<String>) -> Self {
        self.panel_id = non_blank(id.into());
        self
    }

    pub fn with_panel_time(mut self, time: impl Into<String>) -> Self {
        self.panel_time = non_blank(time.into());
        self
    }

    pub fn with_research_question(mut self, question: impl Into<String>) -> Self {
        self.research_question = question.into();
        self
    }

    pub fn with_report_type(mut self, report_type: impl Into<String>) -> Self {
        self.report_type = report_type.into();
        self
    }

    /// Replace the dependent variable, dropping it from the predictors if present.
    pub fn with_dependent(mut self, dependent: impl Into<String>) -> Self {
        self.dependent = dependent.into().trim().to_string();
        let current = std::mem::take(&mut self.predictors);
        self.predictors = clean_predictors(&self.dependent, current);
        self
    }

    pub fn with_predictors<I, S>(mut self, predictors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predictors = clean_predictors(&self.dependent, predictors);
        self
    }

    pub fn dataset(&self) -> &DatasetHandle {
        &self.dataset
    }

    pub fn dependent(&self) -> &str {
        &self.dependent
    }

    pub fn predictors(&self) -> &[String] {
        &self.predictors
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn panel_id(&self) -> Option<&str> {
        self.panel_id.as_deref()
    }

    pub fn panel_time(&self) -> Option<&str> {
        self.panel_time.as_deref()
    }

    pub fn research_question(&self) -> &str {
        &self.research_question
    }

    pub fn report_type(&self) -> &str {
        &self.report_type
    }

    /// Comma-joined predictor list as sent in `predictor_override`.
    pub fn predictor_override(&self) -> String {
        self.predictors.join(",")
    }

    /// Check client-side preconditions. Runs before any network call.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.dependent.is_empty() {
            return Err(JobError::validation("dependent variable is required"));
        }
        if self.method.is_panel() {
            let mut missing = Vec::new();
            if self.panel_id.is_none() {
                missing.push("panel_id");
            }
            if self.panel_time.is_none() {
                missing.push("panel_time");
            }
            if !missing.is_empty() {
                return Err(JobError::validation(format!(
                    "{} requires {}",
                    self.method,
                    missing.join(" and ")
                )));
            }
        }
        Ok(())
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn clean_predictors<I, S>(dependent: &str, predictors: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut cleaned: Vec<String> = Vec::new();
    for predictor in predictors {
        let predictor = predictor.into().trim().to_string();
        if predictor.is_empty() || predictor == dependent || cleaned.contains(&predictor) {
            continue;
        }
        cleaned.push(predictor);
    }
    cleaned
}

/// Opaque identifier the backend assigns to one submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionHandle(String);

impl ExecutionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status strings that mean the job finished successfully.
pub const SUCCESS_STATUSES: &[&str] = &["done", "success"];

/// Status strings that mean the job finished with an error.
pub const ERROR_STATUSES: &[&str] = &["error", "failed"];

/// Status of one job as reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStatus {
    /// Queued or running. Carries the raw status string for logging.
    Running { status: String },
    /// Finished; carries the raw `result` bundle.
    Done(Value),
    /// Finished with an error; carries the whole payload verbatim.
    Error(Value),
}

impl ExecutionStatus {
    /// Interpret a status payload (`{status, result?, ...}`).
    ///
    /// This is the single place where backend status strings are mapped onto
    /// terminal and non-terminal states. Unknown strings are non-terminal.
    pub fn from_payload(payload: Value) -> Result<Self, JobError> {
        let status = payload
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_lowercase())
            .ok_or_else(|| JobError::backend("status response is missing the 'status' field"))?;

        if SUCCESS_STATUSES.contains(&status.as_str()) {
            let result = payload.get("result").cloned().unwrap_or(Value::Null);
            Ok(ExecutionStatus::Done(result))
        } else if ERROR_STATUSES.contains(&status.as_str()) {
            Ok(ExecutionStatus::Error(payload))
        } else {
            Ok(ExecutionStatus::Running { status })
        }
    }

    pub fn running() -> Self {
        ExecutionStatus::Running {
            status: "running".to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running { .. })
    }

    pub fn label(&self) -> &str {
        match self {
            ExecutionStatus::Running { status } => status,
            ExecutionStatus::Done(_) => "done",
            ExecutionStatus::Error(_) => "error",
        }
    }
}
