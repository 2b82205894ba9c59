//! # Econo Core
//!
//! Client core for a remote econometric analysis service.
//! Provides job submission, execution tracking over polling and a progress
//! stream, result normalization across estimators, comparison tables,
//! configuration, and fundamental types.

pub mod backend;
pub mod config;
pub mod error;
pub mod progress;
pub mod results;
pub mod submitter;
pub mod tracker;
pub mod types;

// Re-export commonly used types at the crate root.
pub use backend::{AnalysisBackend, HttpBackend, MockBackend};
pub use config::{BackendConfig, EconoConfig, TrackerConfig, load_config};
pub use error::{ConfigError, JobError};
pub use results::{AnalysisReport, ModelKind, ModelResult, ResultBundle};
pub use submitter::JobSubmitter;
pub use tracker::{
    ExecutionTracker, JobOutcome, NoOpCallback, RecordingCallback, TrackerCallback,
    TrackerSnapshot, TrackerState,
};
pub use types::{
    AnalysisRequest, DatasetHandle, DatasetProfile, ExecutionHandle, ExecutionStatus, Method,
};
