//! Plain-text rendering of profiles, regression tables, and comparisons.

use econo_core::DatasetProfile;
use econo_core::results::format::{ESTIMATE_DECIMALS, format_fixed, hausman_lines, regression_rows};
use econo_core::results::{
    AnalysisReport, HausmanTestResult, ModelKind, ModelResult, PairwiseComparison, SummaryTable,
};
use serde_json::{Map, Value};

/// Lay out a table: first column left-aligned, the rest right-aligned.
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let width = widths.get(i).copied().unwrap_or(0);
                if i == 0 {
                    format!("{cell:<width$}")
                } else {
                    format!("{cell:>width$}")
                }
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(headers.to_vec()));
    out.push('\n');
    let total: usize = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
    out.push_str(&"-".repeat(total));
    out.push('\n');
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
        out.push('\n');
    }
    out
}

pub fn render_profile(profile: &DatasetProfile) -> String {
    let list = |items: &[String]| {
        if items.is_empty() {
            "(none)".to_string()
        } else {
            items.join(", ")
        }
    };
    let dv = if profile.auto_dependent_variable.is_empty() {
        "(none)"
    } else {
        profile.auto_dependent_variable.as_str()
    };
    format!(
        "Columns:              {}\nDependent variable:   {}\nSuggested predictors: {}\nPanel id candidates:  {}\nTime candidates:      {}\n",
        list(&profile.columns),
        dv,
        list(&profile.suggested_predictors),
        list(&profile.auto_id_candidates),
        list(&profile.auto_time_candidates),
    )
}

pub fn render_model(kind: ModelKind, model: &ModelResult) -> String {
    let mut out = format!("{kind}\n");
    if model.is_empty() {
        out.push_str("(no coefficients)\n");
        return out;
    }
    let rows: Vec<Vec<String>> = regression_rows(model)
        .into_iter()
        .map(|r| {
            let estimate = if r.marker.is_empty() {
                r.estimate
            } else {
                format!("{} {}", r.estimate, r.marker)
            };
            vec![r.variable, estimate, r.std_error, r.t_stat, r.p_value]
        })
        .collect();
    out.push_str(&table(
        &["Variable", "Estimate", "Std. Error", "t", "p"],
        &rows,
    ));
    out
}

pub fn render_summary(summary: &SummaryTable) -> String {
    let mut headers = vec!["Variable"];
    headers.extend(summary.models.iter().map(|m| m.short_label()));
    let rows: Vec<Vec<String>> = summary
        .rows
        .iter()
        .map(|row| {
            let mut cells = vec![row.variable.clone()];
            cells.extend(
                summary
                    .models
                    .iter()
                    .map(|&m| format_fixed(row.estimate(m), ESTIMATE_DECIMALS)),
            );
            cells
        })
        .collect();
    format!("Model summary\n{}", table(&headers, &rows))
}

pub fn render_pairwise(cmp: &PairwiseComparison) -> String {
    let rows: Vec<Vec<String>> = cmp
        .rows
        .iter()
        .map(|row| {
            vec![
                row.variable.clone(),
                format_fixed(row.estimate(cmp.left), ESTIMATE_DECIMALS),
                format_fixed(row.estimate(cmp.right), ESTIMATE_DECIMALS),
                format_fixed(row.difference, ESTIMATE_DECIMALS),
            ]
        })
        .collect();
    format!(
        "{} vs {}\n{}",
        cmp.left,
        cmp.right,
        table(
            &[
                "Variable",
                cmp.left.short_label(),
                cmp.right.short_label(),
                "Difference"
            ],
            &rows
        )
    )
}

pub fn render_hausman(hausman: &HausmanTestResult) -> String {
    let mut out = String::from("Hausman test\n");
    for line in hausman_lines(hausman) {
        if !line.is_empty() {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

/// Report file and plot links the backend attached to the result, if any.
pub fn render_attachments(extra: &Map<String, Value>) -> Option<String> {
    let mut out = String::new();
    if let Some(report_file) = extra
        .get("report_file")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        out.push_str(&format!("Report: {report_file}\n"));
    }
    let plots: Vec<&str> = extra
        .get("plots")
        .and_then(Value::as_array)
        .map(|plots| plots.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if !plots.is_empty() {
        out.push_str("Plots:\n");
        for plot in plots {
            out.push_str(&format!("  {plot}\n"));
        }
    }
    (!out.is_empty()).then_some(out)
}

/// Every table the report supports, separated by blank lines.
pub fn render_report(report: &AnalysisReport) -> String {
    let mut sections = Vec::new();
    for kind in ModelKind::ORDER {
        if let Some(model) = report.bundle.model(kind) {
            sections.push(render_model(kind, model));
        }
    }
    if report.bundle.models.len() > 1 {
        sections.push(render_summary(&report.summary));
    }
    if let Some(cmp) = &report.fe_re {
        sections.push(render_pairwise(cmp));
    }
    if let Some(hausman) = &report.bundle.hausman {
        sections.push(render_hausman(hausman));
    }
    if sections.is_empty() {
        sections.push("No model results returned.\n".to_string());
    }
    if let Some(attachments) = render_attachments(&report.bundle.extra) {
        sections.push(attachments);
    }
    sections.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use econo_core::Method;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn report() -> AnalysisReport {
        AnalysisReport::build(
            &json!({
                "fe": {"results": [{"feature": "x1", "estimate": 1.5, "std_error": 0.5, "p_value": 0.003}]},
                "re": {"results": [{"name": "x1", "coef": 1.0, "se": 0.25, "p": 0.0001}]},
                "hausman": {"df": 1, "chi2": 5.0, "p": 0.0253, "interpretation": "Use FE"}
            }),
            Method::Hausman,
        )
    }

    #[test]
    fn test_table_alignment() {
        let out = table(
            &["Variable", "Estimate"],
            &[vec!["x".into(), "2.0000".into()], vec!["long_name".into(), "-10.5000".into()]],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Variable   Estimate");
        assert_eq!(lines[1], "-------------------");
        assert_eq!(lines[2], "x            2.0000");
        assert_eq!(lines[3], "long_name  -10.5000");
    }

    #[test]
    fn test_model_table_marks_significance() {
        let r = report();
        let out = render_model(ModelKind::FixedEffects, r.bundle.model(ModelKind::FixedEffects).unwrap());
        assert!(out.starts_with("Fixed Effects\n"));
        assert!(out.contains("1.5000 **"));
        assert!(out.contains("3.000"));
    }

    #[test]
    fn test_report_sections() {
        let out = render_report(&report());
        assert!(out.contains("Model summary"));
        assert!(out.contains("Fixed Effects vs Random Effects"));
        assert!(out.contains("0.5000"));
        assert!(out.contains("chi2(1) = 5.0000"));
        assert!(out.contains("Use FE"));
    }

    #[test]
    fn test_empty_report() {
        let out = render_report(&AnalysisReport::build(&json!({}), Method::Ols));
        assert_eq!(out, "No model results returned.\n");
    }

    #[test]
    fn test_report_lists_attachments() {
        let out = render_report(&AnalysisReport::build(
            &json!({
                "ols": {"results": [{"variable": "x", "estimate": 1.0}]},
                "report_file": "/reports/abc.pdf",
                "plots": ["/plots/resid.png", "/plots/qq.png"]
            }),
            Method::Ols,
        ));
        assert!(out.ends_with("Report: /reports/abc.pdf\nPlots:\n  /plots/resid.png\n  /plots/qq.png\n"));
    }

    #[test]
    fn test_attachments_absent() {
        assert_eq!(render_attachments(&Map::new()), None);
        let extra = json!({"report_file": "", "plots": [], "notes": "x"});
        assert_eq!(render_attachments(extra.as_object().unwrap()), None);
        assert!(!render_report(&report()).contains("Plots:"));
    }

    #[test]
    fn test_profile_placeholders() {
        let out = render_profile(&DatasetProfile {
            columns: vec!["y".into(), "x".into()],
            ..Default::default()
        });
        assert!(out.contains("Columns:              y, x"));
        assert!(out.contains("Dependent variable:   (none)"));
    }
}
