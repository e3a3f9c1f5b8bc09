//! TogoMCP Evaluation Core Library
//!
//! Re-exports the components of the dual-mode evaluation harness:
//! question loading, the Anthropic client, the test runner, result
//! storage, and the results analyzer.

pub mod analyzer;
pub mod client;
pub mod config;
pub mod error;
pub mod question;
pub mod runner;
pub mod store;
pub mod telemetry;

pub use analyzer::{
    analyze, export_insights, AnswerComparison, CategoryStats, FailureRecord, InsightReport,
    ModeUsage, SuccessStats, ToolUsage,
};
pub use client::{
    AnthropicClient, ClientError, InvocationClient, InvocationRequest, InvocationResponse,
    ToolInvocation, API_KEY_ENV,
};
pub use config::{RunConfig, DEFAULT_BASELINE_PROMPT, DEFAULT_TOGOMCP_PROMPT};
pub use error::{EvalError, Result};
pub use question::{load_questions, Category, McpServerConfig, Question, DEFAULT_MCP_URL};
pub use runner::{CheckpointPolicy, TestRunner};
pub use store::{EvaluationResult, ExportFormat, InvocationOutcome, ResultSet};
pub use telemetry::init_tracing;

/// Harness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
