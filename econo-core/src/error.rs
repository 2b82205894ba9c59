//! Error types for the Econo core library.
//!
//! Uses `thiserror` for public API error types. Job errors follow a four-way
//! taxonomy: client-side validation, transport, backend contract, and
//! asynchronous failures reported after a job was accepted.

/// Errors raised while submitting or tracking one analysis job.
///
/// Every variant is terminal for the current job; nothing in the core retries.
/// The type is `Clone` so a failure can be carried inside published tracker
/// snapshots.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    /// A client-side precondition failed. No network call was made.
    #[error("Invalid request: {message}")]
    Validation { message: String },

    /// The backend could not be reached, or the connection broke mid-request.
    #[error("Network failure: {message}")]
    Network { message: String },

    /// The backend answered, but not with a success response of the expected shape.
    #[error("Backend rejected request: {message}")]
    Backend { message: String },

    /// The job was accepted but later reported a terminal error status.
    /// The payload is the backend's error body, kept verbatim.
    #[error("Analysis failed: {payload}")]
    Async { payload: serde_json::Value },
}

impl JobError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Classify a `reqwest` failure. Anything that happened before a response
    /// arrived is a network failure; a bad status or undecodable body is the
    /// backend's fault.
    pub fn from_reqwest(context: &str, err: reqwest::Error) -> Self {
        if err.is_status() || err.is_decode() {
            Self::backend(format!("{context}: {err}"))
        } else {
            Self::network(format!("{context}: {err}"))
        }
    }

    /// Short machine-friendly label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Validation { .. } => "validation",
            JobError::Network { .. } => "network",
            JobError::Backend { .. } => "backend",
            JobError::Async { .. } => "async",
        }
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration parse error: {message}")]
    ParseError { message: String },

    #[error("Configuration could not be serialized: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::ParseError {
            message: err.to_string(),
        }
    }
}
