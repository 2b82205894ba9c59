//! Result normalization and cross-model comparison.
//!
//! Backends for different estimators name the same coefficient attributes
//! differently. `normalize` maps each raw payload onto one canonical row
//! schema, `compare` projects canonical rows into summary and pairwise
//! tables, and `format` turns values into display strings.

pub mod compare;
pub mod format;
pub mod normalize;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::types::Method;

pub use compare::{
    ComparisonRow, ModelEstimate, PairwiseComparison, SummaryTable, build_fe_re_comparison,
    build_pairwise, build_summary,
};
pub use format::{
    RegressionDisplayRow, format_fixed, hausman_lines, regression_rows, significance_marker,
};
pub use normalize::{is_intercept, normalize_hausman, normalize_model, normalize_row};

/// The estimators whose results can appear in one bundle.
///
/// Declaration order is the fixed column order of comparison tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Ols,
    FixedEffects,
    RandomEffects,
    ArellanoBondGmm,
}

impl ModelKind {
    pub const ORDER: [ModelKind; 4] = [
        ModelKind::Ols,
        ModelKind::FixedEffects,
        ModelKind::RandomEffects,
        ModelKind::ArellanoBondGmm,
    ];

    /// Bundle keys accepted for this model, in priority order.
    pub fn bundle_keys(&self) -> &'static [&'static str] {
        match self {
            ModelKind::Ols => &["ols"],
            ModelKind::FixedEffects => &["fe", "fixed_effects"],
            ModelKind::RandomEffects => &["re", "random_effects"],
            ModelKind::ArellanoBondGmm => &["ab", "gmm", "arellano_bond"],
        }
    }

    /// Column heading used in tables.
    pub fn short_label(&self) -> &'static str {
        match self {
            ModelKind::Ols => "OLS",
            ModelKind::FixedEffects => "FE",
            ModelKind::RandomEffects => "RE",
            ModelKind::ArellanoBondGmm => "AB GMM",
        }
    }

    /// The model a single-model submission produces. A Hausman run produces
    /// both FE and RE, so it has no single model.
    pub fn for_method(method: Method) -> Option<ModelKind> {
        match method {
            Method::Ols => Some(ModelKind::Ols),
            Method::FixedEffects => Some(ModelKind::FixedEffects),
            Method::RandomEffects => Some(ModelKind::RandomEffects),
            Method::ArellanoBondGmm => Some(ModelKind::ArellanoBondGmm),
            Method::Hausman => None,
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Ols => write!(f, "OLS"),
            ModelKind::FixedEffects => write!(f, "Fixed Effects"),
            ModelKind::RandomEffects => write!(f, "Random Effects"),
            ModelKind::ArellanoBondGmm => write!(f, "Arellano-Bond GMM"),
        }
    }
}

/// One coefficient after alias resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRow {
    pub variable: String,
    pub estimate: Option<f64>,
    pub std_error: Option<f64>,
    /// Reported t-statistic, or estimate / standard error when not reported.
    pub t_stat: Option<f64>,
    pub p_value: Option<f64>,
}

impl CoefficientRow {
    pub fn is_intercept(&self) -> bool {
        is_intercept(&self.variable)
    }
}

/// Canonical rows for one model, plus whatever else the backend sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub rows: Vec<CoefficientRow>,
    /// Every top-level field other than `results`, passed through untouched.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ModelResult {
    pub fn row(&self, variable: &str) -> Option<&CoefficientRow> {
        self.rows.iter().find(|r| r.variable == variable)
    }

    pub fn estimate(&self, variable: &str) -> Option<f64> {
        self.row(variable).and_then(|r| r.estimate)
    }

    /// Variable names excluding the intercept, in row order.
    pub fn predictors(&self) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .filter(|r| !r.is_intercept())
            .map(|r| r.variable.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Hausman specification test, surfaced as received.
///
/// Numbers the backend left out stay empty; the interpretation is kept either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HausmanTestResult {
    pub df: Option<u64>,
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
    /// Backend's conclusion text. Never recomputed locally.
    pub interpretation: String,
}

impl HausmanTestResult {
    /// Whether df, statistic, and p-value were all reported.
    pub fn is_complete(&self) -> bool {
        self.df.is_some() && self.statistic.is_some() && self.p_value.is_some()
    }
}

/// All per-model results from one finished job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultBundle {
    pub models: BTreeMap<ModelKind, ModelResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hausman: Option<HausmanTestResult>,
    /// Top-level fields that are neither models nor the Hausman test
    /// (report links, plot URLs, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ResultBundle {
    pub fn model(&self, kind: ModelKind) -> Option<&ModelResult> {
        self.models.get(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.hausman.is_none()
    }
}

/// Normalized results plus the comparison tables built from them.
///
/// Built once when a job completes and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub method: Method,
    pub bundle: ResultBundle,
    pub summary: SummaryTable,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fe_re: Option<PairwiseComparison>,
}

impl AnalysisReport {
    pub fn build(result: &Value, method: Method) -> Self {
        let bundle = normalize::normalize_bundle(result, method);
        let summary = build_summary(&bundle);
        let fe_re = build_fe_re_comparison(&bundle);
        Self {
            method,
            bundle,
            summary,
            fe_re,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_kind_order_matches_ord() {
        let mut kinds = ModelKind::ORDER.to_vec();
        kinds.reverse();
        kinds.sort();
        assert_eq!(kinds, ModelKind::ORDER.to_vec());
    }

    #[test]
    fn test_for_method() {
        assert_eq!(ModelKind::for_method(Method::Ols), Some(ModelKind::Ols));
        assert_eq!(ModelKind::for_method(Method::Hausman), None);
    }

    #[test]
    fn test_report_build_hausman_bundle() {
        let result = json!({
            "fe": {"results": [
                {"variable": "Intercept", "estimate": 0.3},
                {"variable": "x1", "estimate": 1.5, "std_error": 0.5}
            ]},
            "re": {"results": [
                {"variable": "x1", "coef": 1.0}
            ]},
            "hausman": {"df": 1, "statistic": 4.2, "pvalue": 0.04, "interpretation": "Use FE"},
            "report_file": "/reports/abc.pdf"
        });
        let report = AnalysisReport::build(&result, Method::Hausman);
        assert_eq!(report.bundle.models.len(), 2);
        assert_eq!(report.summary.rows.len(), 1);
        let fe_re = report.fe_re.expect("fe and re are both present");
        assert_eq!(fe_re.rows[0].difference, Some(0.5));
        assert_eq!(fe_re.hausman.unwrap().interpretation, "Use FE");
        assert_eq!(report.bundle.extra["report_file"], "/reports/abc.pdf");
    }

    #[test]
    fn test_model_predictors_skip_intercept() {
        let model = normalize_model(&json!({"results": [
            {"name": "(Intercept)", "value": 1.0},
            {"name": "educ", "value": 0.08}
        ]}));
        assert_eq!(model.predictors().collect::<Vec<_>>(), vec!["educ"]);
        assert_eq!(model.estimate("educ"), Some(0.08));
        assert_eq!(model.estimate("exper"), None);
    }
}
