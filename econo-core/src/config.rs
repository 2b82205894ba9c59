//! Configuration system for Econo.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from the user config directory (`config.toml`) and/or
//! `.econo/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level configuration for the Econo client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EconoConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub submission: SubmissionDefaults,
}

/// Where the analysis backend lives and how long single requests may take.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend, e.g. `https://analysis.example.com`.
    pub base_url: String,
    /// Path prefix in front of every endpoint (`api` gives `/api/analyze`).
    pub api_prefix: String,
    /// Timeout for one request/response exchange. Not applied to the
    /// progress stream, which stays open for the life of the job.
    pub request_timeout_secs: u64,
    /// Timeout for establishing a connection.
    pub connect_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_prefix: "api".to_string(),
            request_timeout_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

impl BackendConfig {
    /// Join base URL, prefix, and path with exactly one `/` between each part.
    pub fn endpoint(&self, path: &str) -> String {
        let mut url = self.base_url.trim_end_matches('/').to_string();
        for segment in [self.api_prefix.as_str(), path] {
            let segment = segment.trim_matches('/');
            if !segment.is_empty() {
                url.push('/');
                url.push_str(segment);
            }
        }
        url
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validate this backend config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        match url::Url::parse(&self.base_url) {
            Ok(parsed) if !matches!(parsed.scheme(), "http" | "https") => {
                warnings.push(format!(
                    "base_url scheme '{}' is not http or https",
                    parsed.scheme()
                ));
            }
            Ok(_) => {}
            Err(e) => warnings.push(format!("base_url '{}' is not a valid URL: {}", self.base_url, e)),
        }
        if self.request_timeout_secs == 0 {
            warnings.push("request_timeout_secs is 0; every request will time out".to_string());
        }
        warnings
    }
}

/// Execution tracker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Fixed interval between status polls, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.poll_interval_ms == 0 {
            warnings.push("poll_interval_ms is 0; clamping to 1ms".to_string());
        } else if self.poll_interval_ms < 250 {
            warnings.push(format!(
                "poll_interval_ms ({}) is very low and may overload the backend",
                self.poll_interval_ms
            ));
        }
        warnings
    }
}

/// Defaults for the free-text fields sent with every analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionDefaults {
    pub report_type: String,
    #[serde(default)]
    pub research_question: String,
}

impl Default for SubmissionDefaults {
    fn default() -> Self {
        Self {
            report_type: "executive".to_string(),
            research_question: String::new(),
        }
    }
}

impl EconoConfig {
    /// Collect warnings from every section.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.backend.validate();
        warnings.extend(self.tracker.validate());
        warnings
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `ECONO_`)
/// 3. Workspace-local config (`.econo/config.toml`)
/// 4. User config (`<config dir>/econo/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&EconoConfig>,
) -> Result<EconoConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(EconoConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "econo", "econo") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".econo").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // ECONO_BACKEND__BASE_URL, ECONO_TRACKER__POLL_INTERVAL_MS, ...
    figment = figment.merge(Env::prefixed("ECONO_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    Ok(figment.extract()?)
}

/// Render the effective configuration as TOML.
pub fn to_toml(config: &EconoConfig) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}
