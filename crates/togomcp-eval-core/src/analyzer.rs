//! Post-run analysis of a result set.
//!
//! [`analyze`] is a pure function over an in-memory [`ResultSet`]:
//! the same input always yields the same report, and producing a
//! report never mutates the results. Reports can be persisted as
//! pretty-printed JSON with [`export_insights`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{EvalError, Result};
use crate::store::{EvaluationResult, ResultSet};

/// Aggregate success counts for one mode pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuccessStats {
    pub total: usize,
    pub baseline_successes: usize,
    pub togomcp_successes: usize,
    /// Percentage in `[0, 100]`; 0 for an empty set.
    pub baseline_rate: f64,
    pub togomcp_rate: f64,
    /// `togomcp_rate - baseline_rate`. Negative when the augmented
    /// mode fails more often.
    pub improvement: f64,
}

impl SuccessStats {
    fn from_counts(total: usize, baseline: usize, togomcp: usize) -> Self {
        let rate = |n: usize| {
            if total == 0 {
                0.0
            } else {
                n as f64 * 100.0 / total as f64
            }
        };
        let baseline_rate = rate(baseline);
        let togomcp_rate = rate(togomcp);
        Self {
            total,
            baseline_successes: baseline,
            togomcp_successes: togomcp,
            baseline_rate,
            togomcp_rate,
            improvement: togomcp_rate - baseline_rate,
        }
    }
}

/// Per-category breakdown, keyed by the category display name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryStats {
    pub category: String,
    pub stats: SuccessStats,
    /// Share of this category's questions whose augmented invocation
    /// used at least one tool, as a percentage.
    pub tool_adoption_rate: f64,
}

/// How often one tool was exercised across the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUsage {
    pub name: String,
    /// Number of questions whose augmented invocation used this tool
    /// at least once.
    pub questions: usize,
    /// Total individual calls, counting repeats within a question.
    pub calls: usize,
}

/// One failed invocation, extracted for triage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureRecord {
    pub question_id: String,
    pub category: String,
    /// `"baseline"` or `"togomcp"`.
    pub mode: String,
    pub error: String,
}

/// Side-by-side answers for manual review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerComparison {
    pub question_id: String,
    pub category: String,
    pub question_text: String,
    pub expected_answer: String,
    pub baseline_text: String,
    pub togomcp_text: String,
    pub tools_used: Vec<String>,
}

/// Wall-clock and token cost per mode. Totals cover all invocations;
/// means cover successful invocations only.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModeUsage {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub mean_secs: f64,
    pub mean_input_tokens: f64,
    pub mean_output_tokens: f64,
}

/// Everything the analyzer derives from one result set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsightReport {
    pub overall: SuccessStats,
    /// Ordered by category display name.
    pub categories: Vec<CategoryStats>,
    /// Ordered by question count descending; ties keep first-seen
    /// order.
    pub tool_usage: Vec<ToolUsage>,
    /// Share of all questions whose augmented invocation used at
    /// least one tool, as a percentage.
    pub tool_adoption_rate: f64,
    pub failures: Vec<FailureRecord>,
    pub comparisons: Vec<AnswerComparison>,
    pub baseline_usage: ModeUsage,
    pub togomcp_usage: ModeUsage,
}

/// Derive the full insight report. Pure and idempotent.
pub fn analyze(results: &ResultSet) -> InsightReport {
    let rows = results.results();

    let overall = SuccessStats::from_counts(
        rows.len(),
        rows.iter().filter(|r| r.baseline.success).count(),
        rows.iter().filter(|r| r.togomcp.success).count(),
    );

    InsightReport {
        overall,
        categories: category_breakdown(rows),
        tool_usage: tool_usage(rows),
        tool_adoption_rate: tool_adoption_rate(rows),
        failures: failures(rows),
        comparisons: comparisons(rows),
        baseline_usage: mode_usage(rows.iter().map(|r| &r.baseline)),
        togomcp_usage: mode_usage(rows.iter().map(|r| &r.togomcp)),
    }
}

/// Persist a report as pretty-printed JSON, atomically.
pub fn export_insights(report: &InsightReport, path: &Path) -> Result<()> {
    let bytes =
        serde_json::to_vec_pretty(report).map_err(|e| EvalError::Serialization(e.to_string()))?;
    crate::store::atomic_write(path, &bytes)
}

fn category_breakdown(rows: &[EvaluationResult]) -> Vec<CategoryStats> {
    // BTreeMap keyed by display name gives a deterministic order.
    let mut counts: BTreeMap<String, (usize, usize, usize, usize)> = BTreeMap::new();
    for row in rows {
        let entry = counts.entry(row.category.to_string()).or_default();
        entry.0 += 1;
        if row.baseline.success {
            entry.1 += 1;
        }
        if row.togomcp.success {
            entry.2 += 1;
        }
        if row.togomcp.used_tools() {
            entry.3 += 1;
        }
    }

    counts
        .into_iter()
        .map(|(category, (total, baseline, togomcp, adopted))| CategoryStats {
            category,
            stats: SuccessStats::from_counts(total, baseline, togomcp),
            tool_adoption_rate: adopted as f64 * 100.0 / total as f64,
        })
        .collect()
}

fn tool_usage(rows: &[EvaluationResult]) -> Vec<ToolUsage> {
    // Vec keeps first-seen order so ties rank deterministically.
    let mut usage: Vec<ToolUsage> = Vec::new();

    for row in rows {
        for name in &row.tools_used {
            match usage.iter_mut().find(|u| &u.name == name) {
                Some(entry) => entry.questions += 1,
                None => usage.push(ToolUsage {
                    name: name.clone(),
                    questions: 1,
                    calls: 0,
                }),
            }
        }
        for invocation in &row.togomcp.tool_uses {
            if let Some(entry) = usage.iter_mut().find(|u| u.name == invocation.name) {
                entry.calls += 1;
            }
        }
    }

    usage.sort_by(|a, b| b.questions.cmp(&a.questions));
    usage
}

fn tool_adoption_rate(rows: &[EvaluationResult]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let adopted = rows.iter().filter(|r| r.togomcp.used_tools()).count();
    adopted as f64 * 100.0 / rows.len() as f64
}

fn failures(rows: &[EvaluationResult]) -> Vec<FailureRecord> {
    let mut records = Vec::new();
    for row in rows {
        if !row.baseline.success {
            records.push(FailureRecord {
                question_id: row.question_id.clone(),
                category: row.category.to_string(),
                mode: "baseline".to_string(),
                error: row.baseline.error.clone(),
            });
        }
        if !row.togomcp.success {
            records.push(FailureRecord {
                question_id: row.question_id.clone(),
                category: row.category.to_string(),
                mode: "togomcp".to_string(),
                error: row.togomcp.error.clone(),
            });
        }
    }
    records
}

fn comparisons(rows: &[EvaluationResult]) -> Vec<AnswerComparison> {
    rows.iter()
        .map(|row| AnswerComparison {
            question_id: row.question_id.clone(),
            category: row.category.to_string(),
            question_text: row.question_text.clone(),
            expected_answer: row.expected_answer.clone(),
            baseline_text: row.baseline.text.clone(),
            togomcp_text: row.togomcp.text.clone(),
            tools_used: row.tools_used.clone(),
        })
        .collect()
}

fn mode_usage<'a>(
    outcomes: impl Iterator<Item = &'a crate::store::InvocationOutcome>,
) -> ModeUsage {
    let mut usage = ModeUsage::default();
    let mut successes = 0usize;
    let mut secs = 0.0;

    for outcome in outcomes {
        usage.total_input_tokens += outcome.input_tokens;
        usage.total_output_tokens += outcome.output_tokens;
        if outcome.success {
            successes += 1;
            secs += outcome.elapsed_secs;
        }
    }

    if successes > 0 {
        usage.mean_secs = secs / successes as f64;
        usage.mean_input_tokens = usage.total_input_tokens as f64 / successes as f64;
        usage.mean_output_tokens = usage.total_output_tokens as f64 / successes as f64;
    }
    usage
}
