//! Result records and their durable serialization.
//!
//! A [`ResultSet`] accumulates one [`EvaluationResult`] per question
//! during a run and round-trips losslessly through either export
//! format. Exports are atomic: content is staged to a temp file in
//! the destination directory and renamed into place, so a crash or an
//! unwritable destination never truncates a prior successful export.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tempfile::NamedTempFile;

use crate::client::{ClientError, InvocationResponse, ToolInvocation};
use crate::error::{EvalError, Result};
use crate::question::{Category, Question};

/// Outcome of one invocation (baseline or augmented) after the retry
/// policy has run its course.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InvocationOutcome {
    pub success: bool,

    /// Response text; empty on failure.
    pub text: String,

    /// Error description; empty on success.
    pub error: String,

    /// Wall-clock duration of the final attempt, in seconds.
    /// Recorded whether the call succeeded or exhausted its retries.
    pub elapsed_secs: f64,

    pub input_tokens: u64,
    pub output_tokens: u64,

    /// Tool calls in invocation order. Empty by construction for
    /// baseline outcomes (tools are never offered there).
    pub tool_uses: Vec<ToolInvocation>,
}

impl InvocationOutcome {
    pub fn succeeded(response: InvocationResponse, elapsed: Duration) -> Self {
        Self {
            success: true,
            text: response.text,
            error: String::new(),
            elapsed_secs: elapsed.as_secs_f64(),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            tool_uses: response.tool_uses,
        }
    }

    pub fn failed(error: &ClientError, elapsed: Duration) -> Self {
        Self {
            success: false,
            text: String::new(),
            error: error.to_string(),
            elapsed_secs: elapsed.as_secs_f64(),
            input_tokens: 0,
            output_tokens: 0,
            tool_uses: Vec::new(),
        }
    }

    /// Whether the augmented outcome actually exercised a tool.
    pub fn used_tools(&self) -> bool {
        !self.tool_uses.is_empty()
    }
}

/// One question's complete evaluation: both outcomes plus the carried
/// question metadata. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    pub question_id: String,

    /// Run date, `YYYY-MM-DD`.
    pub date: String,

    pub category: Category,
    pub question_text: String,

    pub baseline: InvocationOutcome,
    pub togomcp: InvocationOutcome,

    /// Unique tool names from the augmented outcome, in order of
    /// first occurrence.
    pub tools_used: Vec<String>,

    pub expected_answer: String,
    pub notes: String,
}

impl EvaluationResult {
    /// Assemble a result once both invocations have completed or
    /// failed. Derives `tools_used` from the augmented outcome.
    pub fn assemble(
        question: &Question,
        date: String,
        baseline: InvocationOutcome,
        togomcp: InvocationOutcome,
    ) -> Self {
        let tools_used = dedup_tool_names(&togomcp.tool_uses);
        Self {
            question_id: question.id().to_string(),
            date,
            category: question.category,
            question_text: question.question.clone(),
            baseline,
            togomcp,
            tools_used,
            expected_answer: question.expected_answer.clone(),
            notes: question.notes.clone(),
        }
    }
}

/// Unique tool names preserving first-occurrence order.
fn dedup_tool_names(tool_uses: &[ToolInvocation]) -> Vec<String> {
    let mut seen = Vec::new();
    for invocation in tool_uses {
        if !seen.iter().any(|name| name == &invocation.name) {
            seen.push(invocation.name.clone());
        }
    }
    seen
}

/// Export format selector. `tabular` flattens to one CSV row per
/// result; `structured` keeps the nested shape as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    /// Infer the format of an existing results file from its
    /// extension; anything that is not `.csv` is treated as JSON.
    pub fn infer(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => ExportFormat::Csv,
            _ => ExportFormat::Json,
        }
    }
}

impl FromStr for ExportFormat {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "csv" | "tabular" => Ok(ExportFormat::Csv),
            "json" | "structured" => Ok(ExportFormat::Json),
            other => Err(EvalError::Serialization(format!(
                "unsupported format: {}",
                other
            ))),
        }
    }
}

/// In-memory accumulation of results for one run, owned exclusively
/// by the runner until exported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    results: Vec<EvaluationResult>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_results(results: Vec<EvaluationResult>) -> Self {
        Self { results }
    }

    pub fn push(&mut self, result: EvaluationResult) {
        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> &[EvaluationResult] {
        &self.results
    }

    /// Serialize the full set to `path`, never reordering rows and
    /// never partially overwriting a prior successful export.
    pub fn export(&self, path: &Path, format: ExportFormat) -> Result<()> {
        let bytes = match format {
            ExportFormat::Csv => self.to_csv_bytes()?,
            ExportFormat::Json => serde_json::to_vec_pretty(&self.results)
                .map_err(|e| EvalError::Serialization(e.to_string()))?,
        };
        atomic_write(path, &bytes)
    }

    /// Load a previously exported result set.
    pub fn load(path: &Path) -> Result<Self> {
        match ExportFormat::infer(path) {
            ExportFormat::Csv => Self::load_csv(path),
            ExportFormat::Json => Self::load_json(path),
        }
    }

    fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for result in &self.results {
            let row = CsvRow::from_result(result)?;
            writer
                .serialize(row)
                .map_err(|e| EvalError::Serialization(e.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|e| EvalError::Serialization(e.to_string()))
    }

    fn load_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| {
            EvalError::Serialization(format!("failed to open results file {:?}: {}", path, e))
        })?;

        let mut results = Vec::new();
        for row in reader.deserialize::<CsvRow>() {
            let row = row.map_err(|e| {
                EvalError::Serialization(format!("invalid row in {:?}: {}", path, e))
            })?;
            results.push(row.into_result()?);
        }
        Ok(Self { results })
    }

    fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EvalError::Serialization(format!("failed to read results file {:?}: {}", path, e))
        })?;
        let results: Vec<EvaluationResult> = serde_json::from_str(&content).map_err(|e| {
            EvalError::Serialization(format!("invalid results file {:?}: {}", path, e))
        })?;
        Ok(Self { results })
    }
}

/// Write-then-rename in the destination directory.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| {
        EvalError::Serialization(format!("destination {:?} not writable: {}", path, e))
    })?;
    tmp.write_all(bytes)
        .map_err(|e| EvalError::Serialization(format!("failed to write {:?}: {}", path, e)))?;
    tmp.persist(path)
        .map_err(|e| EvalError::Serialization(format!("failed to persist {:?}: {}", path, e)))?;
    Ok(())
}

/// One flattened row of the tabular export. Field order is the fixed
/// column order of the schema.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    question_id: String,
    date: String,
    category: String,
    question_text: String,
    baseline_success: bool,
    baseline_text: String,
    baseline_error: String,
    baseline_time: f64,
    baseline_input_tokens: u64,
    baseline_output_tokens: u64,
    togomcp_success: bool,
    togomcp_text: String,
    togomcp_error: String,
    togomcp_time: f64,
    togomcp_input_tokens: u64,
    togomcp_output_tokens: u64,
    /// Comma-delimited unique tool names.
    tools_used: String,
    /// JSON-encoded array of `{name, arguments}` records.
    tool_details: String,
    expected_answer: String,
    notes: String,
}

impl CsvRow {
    fn from_result(result: &EvaluationResult) -> Result<Self> {
        let tool_details = serde_json::to_string(&result.togomcp.tool_uses)
            .map_err(|e| EvalError::Serialization(e.to_string()))?;

        Ok(Self {
            question_id: result.question_id.clone(),
            date: result.date.clone(),
            category: result.category.to_string(),
            question_text: result.question_text.clone(),
            baseline_success: result.baseline.success,
            baseline_text: result.baseline.text.clone(),
            baseline_error: result.baseline.error.clone(),
            baseline_time: result.baseline.elapsed_secs,
            baseline_input_tokens: result.baseline.input_tokens,
            baseline_output_tokens: result.baseline.output_tokens,
            togomcp_success: result.togomcp.success,
            togomcp_text: result.togomcp.text.clone(),
            togomcp_error: result.togomcp.error.clone(),
            togomcp_time: result.togomcp.elapsed_secs,
            togomcp_input_tokens: result.togomcp.input_tokens,
            togomcp_output_tokens: result.togomcp.output_tokens,
            tools_used: result.tools_used.join(", "),
            tool_details,
            expected_answer: result.expected_answer.clone(),
            notes: result.notes.clone(),
        })
    }

    fn into_result(self) -> Result<EvaluationResult> {
        let tool_uses: Vec<ToolInvocation> = serde_json::from_str(&self.tool_details)
            .map_err(|e| EvalError::Serialization(format!("invalid tool_details: {}", e)))?;

        let category = self
            .category
            .parse()
            .unwrap_or(Category::Unknown);

        // tools_used is derived data; recompute rather than trusting
        // the delimited column, so the dedup invariant always holds.
        let tools_used = dedup_tool_names(&tool_uses);

        Ok(EvaluationResult {
            question_id: self.question_id,
            date: self.date,
            category,
            question_text: self.question_text,
            baseline: InvocationOutcome {
                success: self.baseline_success,
                text: self.baseline_text,
                error: self.baseline_error,
                elapsed_secs: self.baseline_time,
                input_tokens: self.baseline_input_tokens,
                output_tokens: self.baseline_output_tokens,
                tool_uses: Vec::new(),
            },
            togomcp: InvocationOutcome {
                success: self.togomcp_success,
                text: self.togomcp_text,
                error: self.togomcp_error,
                elapsed_secs: self.togomcp_time,
                input_tokens: self.togomcp_input_tokens,
                output_tokens: self.togomcp_output_tokens,
                tool_uses,
            },
            tools_used,
            expected_answer: self.expected_answer,
            notes: self.notes,
        })
    }
}
