//! Cross-model comparison tables.
//!
//! Both tables are pure projections over normalized results: nothing here
//! recomputes a statistic except the signed difference between two estimates.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{HausmanTestResult, ModelKind, ResultBundle};

/// One model's estimate for a variable, `None` when the model lacks it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelEstimate {
    pub model: ModelKind,
    pub estimate: Option<f64>,
}

/// A variable with one estimate slot per participating model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub variable: String,
    pub estimates: Vec<ModelEstimate>,
    /// Signed difference between the two compared models, when both have a value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difference: Option<f64>,
}

impl ComparisonRow {
    pub fn estimate(&self, model: ModelKind) -> Option<f64> {
        self.estimates
            .iter()
            .find(|e| e.model == model)
            .and_then(|e| e.estimate)
    }
}

/// Every non-intercept variable across all models, one column per model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTable {
    pub models: Vec<ModelKind>,
    pub rows: Vec<ComparisonRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hausman: Option<HausmanTestResult>,
}

/// Two models side by side with the signed difference `left - right`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseComparison {
    pub left: ModelKind,
    pub right: ModelKind,
    pub rows: Vec<ComparisonRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hausman: Option<HausmanTestResult>,
}

/// Build the summary table.
///
/// Variables are collected in first-seen order, walking models in the fixed
/// order OLS, FE, RE, GMM. Every model gets a slot in every row, present in the
/// bundle or not.
pub fn build_summary(bundle: &ResultBundle) -> SummaryTable {
    let mut seen = HashSet::new();
    let mut variables: Vec<&str> = Vec::new();
    for kind in ModelKind::ORDER {
        let Some(model) = bundle.model(kind) else {
            continue;
        };
        for name in model.predictors() {
            if seen.insert(name) {
                variables.push(name);
            }
        }
    }

    let rows = variables
        .into_iter()
        .map(|variable| ComparisonRow {
            variable: variable.to_string(),
            estimates: ModelKind::ORDER
                .iter()
                .map(|&kind| ModelEstimate {
                    model: kind,
                    estimate: bundle.model(kind).and_then(|m| m.estimate(variable)),
                })
                .collect(),
            difference: None,
        })
        .collect();

    SummaryTable {
        models: ModelKind::ORDER.to_vec(),
        rows,
        hausman: bundle.hausman.clone(),
    }
}

/// Compare two models over the left model's predictors.
///
/// Returns `None` unless both models are present. A predictor missing from the
/// right model gets a `None` estimate and no difference.
pub fn build_pairwise(
    bundle: &ResultBundle,
    left: ModelKind,
    right: ModelKind,
) -> Option<PairwiseComparison> {
    let left_model = bundle.model(left)?;
    let right_model = bundle.model(right)?;

    let rows = left_model
        .predictors()
        .map(|variable| {
            let l = left_model.estimate(variable);
            let r = right_model.estimate(variable);
            ComparisonRow {
                variable: variable.to_string(),
                estimates: vec![
                    ModelEstimate {
                        model: left,
                        estimate: l,
                    },
                    ModelEstimate {
                        model: right,
                        estimate: r,
                    },
                ],
                difference: l.zip(r).map(|(l, r)| l - r),
            }
        })
        .collect();

    Some(PairwiseComparison {
        left,
        right,
        rows,
        hausman: bundle.hausman.clone(),
    })
}

/// Fixed effects vs random effects, with the Hausman test alongside.
pub fn build_fe_re_comparison(bundle: &ResultBundle) -> Option<PairwiseComparison> {
    build_pairwise(bundle, ModelKind::FixedEffects, ModelKind::RandomEffects)
}
