//! TogoMCP Evaluation Harness CLI
//!
//! The `togomcp-eval` command runs and analyzes dual-mode LLM
//! evaluations: each question is answered once without tools
//! (baseline) and once with TogoMCP tools attached.
//!
//! ## Commands
//!
//! - `run`: Evaluate a question file in both modes and export results
//! - `analyze`: Summarize a previously exported results file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{warn, Level};

use togomcp_eval_core::{
    analyze, export_insights, load_questions, AnthropicClient, CheckpointPolicy, ExportFormat,
    InsightReport, ResultSet, RunConfig, TestRunner,
};

#[derive(Parser)]
#[command(name = "togomcp-eval")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Dual-mode LLM evaluation harness for TogoMCP", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    /// One flattened row per question
    #[value(alias = "tabular")]
    Csv,
    /// Nested result records
    #[value(alias = "structured")]
    Json,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => ExportFormat::Csv,
            FormatArg::Json => ExportFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every question in both modes and export the results
    Run {
        /// Question file (JSON array)
        questions_file: PathBuf,

        /// Run configuration file (JSON); defaults apply for absent fields
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Model identifier; overrides the config file
        #[arg(short, long)]
        model: Option<String>,

        /// Output path for the exported results
        #[arg(short, long, default_value = "evaluation_results.csv")]
        output: PathBuf,

        /// Export format
        #[arg(short, long, value_enum, default_value_t = FormatArg::Csv)]
        format: FormatArg,
    },

    /// Summarize a previously exported results file
    Analyze {
        /// Results file (.csv or .json)
        results_file: PathBuf,

        /// Also write the full report as pretty-printed JSON
        #[arg(long)]
        export_insights: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    togomcp_eval_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            questions_file,
            config,
            model,
            output,
            format,
        } => {
            cmd_run(
                &questions_file,
                config.as_deref(),
                model.as_deref(),
                &output,
                format.into(),
            )
            .await
        }
        Commands::Analyze {
            results_file,
            export_insights,
        } => cmd_analyze(&results_file, export_insights.as_deref(), cli.verbose),
    }
}

/// Run the full evaluation and export the result set.
async fn cmd_run(
    questions_file: &Path,
    config_file: Option<&Path>,
    model: Option<&str>,
    output: &Path,
    format: ExportFormat,
) -> Result<()> {
    let mut config = RunConfig::load(config_file).context("Failed to load run configuration")?;
    if let Some(model) = model {
        config.model = model.to_string();
    }
    config
        .validate()
        .context("Run configuration is incomplete")?;

    let questions =
        load_questions(questions_file).context("Failed to load question file")?;

    // Credential problems abort before the first question, not after.
    let client = AnthropicClient::from_env(&config)?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing the current question");
            signal_token.cancel();
        }
    });

    let checkpoint_path = output.with_file_name(format!(
        "evaluation_results_intermediate.{}",
        format.extension()
    ));
    let checkpoint = CheckpointPolicy {
        interval: config.checkpoint_interval,
        path: checkpoint_path,
        format,
    };

    let runner = TestRunner::new(client, config)
        .with_checkpoint(checkpoint)
        .with_cancellation(cancel);

    let results = runner.run(&questions).await?;
    results
        .export(output, format)
        .context("Failed to export results")?;

    print_run_summary(&results, questions.len(), output);
    Ok(())
}

/// Summarize an exported results file.
fn cmd_analyze(results_file: &Path, insights_out: Option<&Path>, verbose: bool) -> Result<()> {
    let results = ResultSet::load(results_file).context("Failed to load results file")?;
    let report = analyze(&results);

    print_report(&report, verbose);

    if let Some(path) = insights_out {
        export_insights(&report, path).context("Failed to export insights")?;
        println!("\nInsights written to {}", path.display());
    }
    Ok(())
}

fn print_run_summary(results: &ResultSet, total_questions: usize, output: &Path) {
    println!();
    println!("=== Run complete ===");
    println!(
        "Questions evaluated: {}/{}",
        results.len(),
        total_questions
    );
    if results.len() < total_questions {
        println!("(run was interrupted; results cover a prefix of the question set)");
    }
    println!("Results written to {}", output.display());

    let report = analyze(results);
    println!(
        "Baseline successes:  {}/{} ({:.1}%)",
        report.overall.baseline_successes, report.overall.total, report.overall.baseline_rate
    );
    println!(
        "TogoMCP successes:   {}/{} ({:.1}%)",
        report.overall.togomcp_successes, report.overall.total, report.overall.togomcp_rate
    );
    println!(
        "Mean response time:  baseline {:.1}s, togomcp {:.1}s",
        report.baseline_usage.mean_secs, report.togomcp_usage.mean_secs
    );
    println!(
        "Total tokens:        baseline {}/{}, togomcp {}/{} (in/out)",
        report.baseline_usage.total_input_tokens,
        report.baseline_usage.total_output_tokens,
        report.togomcp_usage.total_input_tokens,
        report.togomcp_usage.total_output_tokens,
    );
}

fn print_report(report: &InsightReport, verbose: bool) {
    println!("=== Overall ===");
    println!("Total questions:   {}", report.overall.total);
    println!(
        "Baseline success:  {}/{} ({:.1}%)",
        report.overall.baseline_successes, report.overall.total, report.overall.baseline_rate
    );
    println!(
        "TogoMCP success:   {}/{} ({:.1}%)",
        report.overall.togomcp_successes, report.overall.total, report.overall.togomcp_rate
    );
    println!("Improvement:       {:+.1}%", report.overall.improvement);
    println!(
        "Mean times:        baseline {:.1}s, togomcp {:.1}s",
        report.baseline_usage.mean_secs, report.togomcp_usage.mean_secs
    );

    if !report.categories.is_empty() {
        println!();
        println!("=== By category ===");
        for entry in &report.categories {
            println!(
                "{:<18} {}/{} baseline, {}/{} togomcp, {:.0}% tool adoption",
                entry.category,
                entry.stats.baseline_successes,
                entry.stats.total,
                entry.stats.togomcp_successes,
                entry.stats.total,
                entry.tool_adoption_rate,
            );
        }
    }

    if !report.tool_usage.is_empty() {
        println!();
        println!("=== Tool usage ===");
        println!(
            "Tool adoption: {:.1}% of questions used at least one tool",
            report.tool_adoption_rate
        );
        for tool in &report.tool_usage {
            println!(
                "{:<24} {} questions, {} calls",
                tool.name, tool.questions, tool.calls
            );
        }
    }

    if !report.failures.is_empty() {
        println!();
        println!("=== Failures ===");
        for failure in &report.failures {
            println!(
                "question {} [{}] {}: {}",
                failure.question_id, failure.category, failure.mode, failure.error
            );
        }
    }

    if verbose {
        println!();
        println!("=== Answer comparisons ===");
        for comparison in &report.comparisons {
            println!("question {} [{}]", comparison.question_id, comparison.category);
            println!("  Q:        {}", comparison.question_text);
            if !comparison.expected_answer.is_empty() {
                println!("  Expected: {}", comparison.expected_answer);
            }
            println!("  Baseline: {}", truncated(&comparison.baseline_text));
            println!("  TogoMCP:  {}", truncated(&comparison.togomcp_text));
            if !comparison.tools_used.is_empty() {
                println!("  Tools:    {}", comparison.tools_used.join(", "));
            }
            println!();
        }
    }
}

/// First 200 characters, for terminal-friendly comparisons.
fn truncated(text: &str) -> String {
    if text.chars().count() <= 200 {
        return text.to_string();
    }
    let cut: String = text.chars().take(200).collect();
    format!("{}...", cut)
}
