//! Alias-table normalization of raw per-model payloads.
//!
//! Each canonical field has a fixed, ordered list of source field names. The
//! first alias present with a non-null value is the one read, so the same
//! payload always resolves the same way regardless of which producer emitted
//! it. A chosen value that is not numeric leaves the field empty.

use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, warn};

use super::{CoefficientRow, HausmanTestResult, ModelKind, ModelResult, ResultBundle};
use crate::types::Method;

/// Source names for the variable name, highest priority first.
pub const NAME_ALIASES: &[&str] = &["feature", "variable", "name"];
/// Source names for the point estimate.
pub const ESTIMATE_ALIASES: &[&str] = &["estimate", "coef", "value"];
/// Source names for the standard error.
pub const STD_ERROR_ALIASES: &[&str] = &["std_error", "se"];
/// Source names for an explicitly reported t-statistic.
pub const T_STAT_ALIASES: &[&str] = &["t_stat", "t_value", "t"];
/// Source names for the p-value.
pub const P_VALUE_ALIASES: &[&str] = &["p_value", "p"];

const HAUSMAN_KEY: &str = "hausman";
const HAUSMAN_STATISTIC_ALIASES: &[&str] = &["statistic", "chi2"];
const HAUSMAN_P_VALUE_ALIASES: &[&str] = &["pvalue", "p_value", "p"];

/// Names that denote the constant term.
const INTERCEPT_NAMES: &[&str] = &["intercept", "(intercept)", "const", "_cons"];

/// Whether `name` is the intercept placeholder (case-insensitive).
pub fn is_intercept(name: &str) -> bool {
    let name = name.trim();
    INTERCEPT_NAMES.iter().any(|n| n.eq_ignore_ascii_case(name))
}

/// Read a finite number from a JSON number or numeric string.
fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// The value under the first alias that is present and not null.
fn resolve_alias<'a>(row: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .find_map(|key| row.get(*key).filter(|v| !v.is_null()))
}

fn resolve_number(row: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    resolve_alias(row, aliases).and_then(as_number)
}

fn resolve_name(row: &Map<String, Value>) -> Option<String> {
    NAME_ALIASES.iter().find_map(|key| {
        row.get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// t = estimate / standard error, when both exist and the divisor is non-zero.
pub fn derive_t_stat(estimate: Option<f64>, std_error: Option<f64>) -> Option<f64> {
    match (estimate, std_error) {
        (Some(est), Some(se)) if se != 0.0 => Some(est / se).filter(|t| t.is_finite()),
        _ => None,
    }
}

/// Resolve one raw coefficient row. Returns `None` when no name alias is present.
pub fn normalize_row(row: &Map<String, Value>) -> Option<CoefficientRow> {
    let variable = resolve_name(row)?;
    let estimate = resolve_number(row, ESTIMATE_ALIASES);
    let std_error = resolve_number(row, STD_ERROR_ALIASES);
    let t_stat =
        resolve_number(row, T_STAT_ALIASES).or_else(|| derive_t_stat(estimate, std_error));
    let p_value = resolve_number(row, P_VALUE_ALIASES);
    Some(CoefficientRow {
        variable,
        estimate,
        std_error,
        t_stat,
        p_value,
    })
}

/// Normalize one model payload.
///
/// Accepts either `{results: [...], ...metadata}` or a bare array of rows.
/// Rows without a name are dropped, as are repeated names after the first.
pub fn normalize_model(payload: &Value) -> ModelResult {
    let (raw_rows, metadata) = match payload {
        Value::Array(rows) => (rows.as_slice(), Map::new()),
        Value::Object(obj) => {
            let rows = obj
                .get("results")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let metadata = obj
                .iter()
                .filter(|(k, _)| k.as_str() != "results")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            (rows, metadata)
        }
        _ => (&[][..], Map::new()),
    };

    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(raw_rows.len());
    for (index, raw) in raw_rows.iter().enumerate() {
        let Some(obj) = raw.as_object() else {
            warn!(index, "Skipping coefficient row that is not an object");
            continue;
        };
        let Some(row) = normalize_row(obj) else {
            warn!(index, "Skipping coefficient row without a variable name");
            continue;
        };
        if !seen.insert(row.variable.clone()) {
            warn!(variable = %row.variable, "Skipping duplicate coefficient row");
            continue;
        }
        rows.push(row);
    }

    ModelResult { rows, metadata }
}

fn as_degrees_of_freedom(value: &Value) -> Option<u64> {
    if let Some(df) = value.as_u64() {
        return Some(df);
    }
    let df = as_number(value)?;
    (df >= 0.0 && df.fract() == 0.0).then_some(df as u64)
}

/// Read a Hausman test payload.
///
/// Missing or unreadable numbers are left empty so the interpretation text
/// still comes through. Returns `None` only when the payload is not an object
/// or carries none of the fields.
pub fn normalize_hausman(payload: &Value) -> Option<HausmanTestResult> {
    let obj = payload.as_object()?;
    let result = HausmanTestResult {
        df: obj
            .get("df")
            .filter(|v| !v.is_null())
            .and_then(as_degrees_of_freedom),
        statistic: resolve_number(obj, HAUSMAN_STATISTIC_ALIASES),
        p_value: resolve_number(obj, HAUSMAN_P_VALUE_ALIASES),
        interpretation: obj
            .get("interpretation")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    };
    if result.df.is_none() && result.statistic.is_none() && result.p_value.is_none() {
        if result.interpretation.is_empty() {
            warn!("Hausman payload has no usable fields");
            return None;
        }
        warn!("Hausman payload has an interpretation but no statistics");
    } else if !result.is_complete() {
        warn!("Hausman payload is missing df, statistic, or p-value");
    }
    Some(result)
}

/// Split a job's `result` value into per-model results and the Hausman test.
///
/// A bare single-model payload (top-level `results` array) is attributed to
/// the submitted method's model.
pub fn normalize_bundle(result: &Value, method: Method) -> ResultBundle {
    let mut bundle = ResultBundle::default();
    let Some(obj) = result.as_object() else {
        if !result.is_null() {
            warn!("Result payload is not an object; nothing to normalize");
        }
        return bundle;
    };

    if obj.contains_key("results") {
        match ModelKind::for_method(method) {
            Some(kind) => {
                bundle.models.insert(kind, normalize_model(result));
            }
            None => warn!(%method, "Bare model payload for a multi-model method; ignoring"),
        }
        return bundle;
    }

    let mut claimed: HashSet<&str> = HashSet::new();
    for kind in ModelKind::ORDER {
        if let Some((key, payload)) = kind
            .bundle_keys()
            .iter()
            .find_map(|key| obj.get(*key).filter(|v| !v.is_null()).map(|v| (*key, v)))
        {
            claimed.insert(key);
            bundle.models.insert(kind, normalize_model(payload));
        }
        // Lower-priority aliases are never treated as extra fields.
        claimed.extend(kind.bundle_keys().iter().copied());
    }

    if let Some(payload) = obj.get(HAUSMAN_KEY).filter(|v| !v.is_null()) {
        bundle.hausman = normalize_hausman(payload);
    }
    claimed.insert(HAUSMAN_KEY);

    bundle.extra = obj
        .iter()
        .filter(|(k, _)| !claimed.contains(k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    debug!(
        models = bundle.models.len(),
        hausman = bundle.hausman.is_some(),
        "Normalized result bundle"
    );
    bundle
}
