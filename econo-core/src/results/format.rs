//! Display formatting for normalized results.
//!
//! Missing values render as empty strings; nothing here can fail.

use serde::Serialize;

use super::{HausmanTestResult, ModelResult};

/// Decimal places for estimates, standard errors, and p-values.
pub const ESTIMATE_DECIMALS: usize = 4;
/// Decimal places for t-statistics.
pub const T_STAT_DECIMALS: usize = 3;

/// Conventional significance stars for a p-value.
pub fn significance_marker(p_value: Option<f64>) -> &'static str {
    match p_value {
        Some(p) if p < 0.001 => "***",
        Some(p) if p < 0.01 => "**",
        Some(p) if p < 0.05 => "*",
        Some(p) if p < 0.1 => ".",
        _ => "",
    }
}

/// Fixed-point rendering, empty for a missing value.
pub fn format_fixed(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.decimals$}"),
        _ => String::new(),
    }
}

/// One line of a per-model regression table, ready to print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegressionDisplayRow {
    pub variable: String,
    pub estimate: String,
    pub std_error: String,
    pub t_stat: String,
    pub p_value: String,
    pub marker: &'static str,
}

/// Display rows for one model, intercept included.
pub fn regression_rows(model: &ModelResult) -> Vec<RegressionDisplayRow> {
    model
        .rows
        .iter()
        .map(|row| RegressionDisplayRow {
            variable: row.variable.clone(),
            estimate: format_fixed(row.estimate, ESTIMATE_DECIMALS),
            std_error: format_fixed(row.std_error, ESTIMATE_DECIMALS),
            t_stat: format_fixed(row.t_stat, T_STAT_DECIMALS),
            p_value: format_fixed(row.p_value, ESTIMATE_DECIMALS),
            marker: significance_marker(row.p_value),
        })
        .collect()
}

/// `chi2(df) = statistic`, `p = p_value`, and the interpretation verbatim.
/// Unreported numbers render empty.
pub fn hausman_lines(hausman: &HausmanTestResult) -> [String; 3] {
    let label = match hausman.df {
        Some(df) => format!("chi2({df})"),
        None => "chi2".to_string(),
    };
    [
        format!(
            "{label} = {}",
            format_fixed(hausman.statistic, ESTIMATE_DECIMALS)
        ),
        format!(
            "p-value = {}",
            format_fixed(hausman.p_value, ESTIMATE_DECIMALS)
        ),
        hausman.interpretation.clone(),
    ]
}
