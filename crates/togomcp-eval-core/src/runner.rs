//! Dual-mode test runner.
//!
//! Drives every question through two invocations — baseline (no
//! tools) then TogoMCP-augmented — strictly sequentially, with an
//! explicit retry loop per invocation, periodic checkpoint snapshots,
//! and interruption safety: cancellation is only observed between
//! questions, so the result sequence is always a clean prefix of the
//! input order.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{ClientError, InvocationClient, InvocationRequest};
use crate::config::RunConfig;
use crate::error::{EvalError, Result};
use crate::question::{McpServerConfig, Question};
use crate::store::{EvaluationResult, ExportFormat, InvocationOutcome, ResultSet};

/// Where and how often the runner persists intermediate snapshots.
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    /// Flush after every `interval` completed questions. Zero disables
    /// periodic flushes; the cancellation flush still happens.
    pub interval: usize,
    pub path: PathBuf,
    pub format: ExportFormat,
}

/// Orchestrates a full evaluation run over an injected client.
pub struct TestRunner<C: InvocationClient> {
    client: C,
    config: RunConfig,
    checkpoint: Option<CheckpointPolicy>,
    cancel: CancellationToken,
}

impl<C: InvocationClient> TestRunner<C> {
    pub fn new(client: C, config: RunConfig) -> Self {
        Self {
            client,
            config,
            checkpoint: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Enable periodic checkpoint snapshots.
    pub fn with_checkpoint(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoint = Some(policy);
        self
    }

    /// Install an external interrupt signal. Checked between
    /// questions only; an in-flight invocation finishes naturally.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run the full question set.
    ///
    /// Returns one result per processed question, in input order. A
    /// question whose invocations fail still yields a result; only
    /// fatal configuration problems abort the run.
    pub async fn run(&self, questions: &[Question]) -> Result<ResultSet> {
        if questions.is_empty() {
            return Err(EvalError::Config("question set is empty".to_string()));
        }
        self.config.validate()?;

        let total = questions.len();
        info!(total, model = %self.config.model, "starting evaluation run");

        let mut results = ResultSet::new();

        for (index, question) in questions.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(
                    completed = results.len(),
                    total, "run interrupted; flushing partial results"
                );
                self.flush_checkpoint(&results);
                return Ok(results);
            }

            let result = self.evaluate_question(question).await;

            info!(
                index = index + 1,
                total,
                question_id = %result.question_id,
                category = %result.category,
                baseline_ok = result.baseline.success,
                baseline_secs = result.baseline.elapsed_secs,
                togomcp_ok = result.togomcp.success,
                togomcp_secs = result.togomcp.elapsed_secs,
                tools = %result.tools_used.join(", "),
                "question evaluated"
            );

            results.push(result);

            if let Some(policy) = &self.checkpoint {
                if policy.interval > 0 && results.len() % policy.interval == 0 {
                    self.flush_checkpoint(&results);
                }
            }
        }

        info!(completed = results.len(), total, "evaluation run complete");
        Ok(results)
    }

    /// Both invocations for one question: baseline first, augmented
    /// second, never concurrent.
    async fn evaluate_question(&self, question: &Question) -> EvaluationResult {
        let date = chrono::Utc::now().format("%Y-%m-%d").to_string();

        let baseline_request = InvocationRequest {
            system_prompt: self.config.baseline_system_prompt.clone(),
            question: question.question.clone(),
            mcp_servers: Vec::new(),
        };
        let baseline = self.invoke_with_retry(&baseline_request).await;

        let servers = question
            .mcp_servers
            .clone()
            .unwrap_or_else(McpServerConfig::togomcp_default);
        let togomcp_request = InvocationRequest {
            system_prompt: self.config.togomcp_system_prompt.clone(),
            question: question.question.clone(),
            mcp_servers: servers,
        };
        let togomcp = self.invoke_with_retry(&togomcp_request).await;

        EvaluationResult::assemble(question, date, baseline, togomcp)
    }

    /// Explicit retry loop over attempt outcomes.
    ///
    /// Transient failures are retried up to `retry_attempts`
    /// additional times with `retry_delay` between attempts.
    /// Permanent failures, and transient failures past the budget,
    /// become failed outcomes — they never abort the run.
    async fn invoke_with_retry(&self, request: &InvocationRequest) -> InvocationOutcome {
        let timeout = Duration::from_secs(self.config.timeout);
        let mut attempt = 0u32;

        loop {
            let start = Instant::now();
            let attempt_result = match tokio::time::timeout(timeout, self.client.generate(request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout(self.config.timeout)),
            };
            let elapsed = start.elapsed();

            match attempt_result {
                Ok(response) => return InvocationOutcome::succeeded(response, elapsed),
                Err(error) if error.is_transient() && attempt < self.config.retry_attempts => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max = self.config.retry_attempts,
                        %error,
                        "transient failure, retrying in {}s",
                        self.config.retry_delay
                    );
                    tokio::time::sleep(Duration::from_secs(self.config.retry_delay)).await;
                }
                Err(error) => {
                    warn!(%error, "invocation failed");
                    return InvocationOutcome::failed(&error, elapsed);
                }
            }
        }
    }

    /// Checkpoint writes are best-effort: losing a snapshot must not
    /// lose the in-memory results it was meant to protect.
    fn flush_checkpoint(&self, results: &ResultSet) {
        let Some(policy) = &self.checkpoint else {
            return;
        };
        match results.export(&policy.path, policy.format) {
            Ok(()) => info!(path = ?policy.path, count = results.len(), "checkpoint saved"),
            Err(error) => warn!(%error, path = ?policy.path, "checkpoint write failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InvocationResponse, ToolInvocation};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted fake client: pops one pre-baked outcome per call.
    struct FakeClient {
        script: Mutex<Vec<std::result::Result<InvocationResponse, ClientError>>>,
        calls: AtomicUsize,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl FakeClient {
        fn new(script: Vec<std::result::Result<InvocationResponse, ClientError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
                cancel_after: None,
            }
        }

        fn cancelling_after(mut self, calls: usize, token: CancellationToken) -> Self {
            self.cancel_after = Some((calls, token));
            self
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl InvocationClient for FakeClient {
        async fn generate(
            &self,
            _request: &InvocationRequest,
        ) -> std::result::Result<InvocationResponse, ClientError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((after, token)) = &self.cancel_after {
                if call == *after {
                    token.cancel();
                }
            }
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(answer("default")))
        }
    }

    fn answer(text: &str) -> InvocationResponse {
        InvocationResponse {
            text: text.to_string(),
            input_tokens: 10,
            output_tokens: 5,
            tool_uses: Vec::new(),
        }
    }

    fn answer_with_tools(text: &str, tools: &[&str]) -> InvocationResponse {
        InvocationResponse {
            tool_uses: tools
                .iter()
                .map(|name| ToolInvocation {
                    name: name.to_string(),
                    arguments: serde_json::json!({}),
                })
                .collect(),
            ..answer(text)
        }
    }

    fn fast_config() -> RunConfig {
        RunConfig {
            retry_delay: 0,
            ..RunConfig::for_model("test-model")
        }
    }

    fn question(id: &str, category: crate::question::Category) -> Question {
        Question {
            id: Some(id.to_string()),
            category,
            question: format!("question {}", id),
            expected_answer: String::new(),
            notes: String::new(),
            mcp_servers: None,
        }
    }

    /// Script entries pop from the back: push outcomes in reverse
    /// call order.
    fn script(
        outcomes: Vec<std::result::Result<InvocationResponse, ClientError>>,
    ) -> Vec<std::result::Result<InvocationResponse, ClientError>> {
        outcomes.into_iter().rev().collect()
    }

    #[tokio::test]
    async fn test_one_result_per_question_in_order() {
        let client = FakeClient::new(vec![]);
        let runner = TestRunner::new(client, fast_config());
        let questions: Vec<Question> = (0..4)
            .map(|i| question(&i.to_string(), crate::question::Category::Unknown))
            .collect();

        let results = runner.run(&questions).await.unwrap();
        assert_eq!(results.len(), 4);
        let ids: Vec<&str> = results
            .results()
            .iter()
            .map(|r| r.question_id.as_str())
            .collect();
        assert_eq!(ids, vec!["0", "1", "2", "3"]);
        // Two invocations per question.
        assert_eq!(runner.client.call_count(), 8);
    }

    #[tokio::test]
    async fn test_empty_question_set_is_config_error() {
        let runner = TestRunner::new(FakeClient::new(vec![]), fast_config());
        let err = runner.run(&[]).await.unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }

    #[tokio::test]
    async fn test_zero_checkpoint_interval_rejected_before_any_invocation() {
        let config = RunConfig {
            checkpoint_interval: 0,
            ..fast_config()
        };
        let dir = tempfile::tempdir().unwrap();
        let runner = TestRunner::new(FakeClient::new(vec![]), config).with_checkpoint(
            CheckpointPolicy {
                interval: 0,
                path: dir.path().join("intermediate.csv"),
                format: ExportFormat::Csv,
            },
        );

        let questions = vec![question("1", crate::question::Category::Unknown)];
        let err = runner.run(&questions).await.unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
        assert_eq!(runner.client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_bound_success_at_limit() {
        // Baseline fails transiently exactly retry_attempts (2) times,
        // then succeeds; augmented succeeds first try with one tool.
        let config = RunConfig {
            retry_attempts: 2,
            ..fast_config()
        };
        let client = FakeClient::new(script(vec![
            Err(ClientError::RateLimited("busy".into())),
            Err(ClientError::Network("reset".into())),
            Ok(answer("baseline answer")),
            Ok(answer_with_tools("augmented answer", &["lookup_X"])),
        ]));

        let runner = TestRunner::new(client, config);
        let questions = vec![question("1", crate::question::Category::Precision)];
        let results = runner.run(&questions).await.unwrap();

        let result = &results.results()[0];
        assert!(result.baseline.success);
        assert!(result.baseline.error.is_empty());
        assert!(result.togomcp.success);
        assert_eq!(result.tools_used, vec!["lookup_X"]);
        assert_eq!(runner.client.call_count(), 5);
    }

    #[tokio::test]
    async fn test_retry_bound_failure_past_limit() {
        // retry_attempts + 1 = 3 transient failures: recorded failure.
        let config = RunConfig {
            retry_attempts: 2,
            ..fast_config()
        };
        let client = FakeClient::new(script(vec![
            Err(ClientError::Network("a".into())),
            Err(ClientError::Network("b".into())),
            Err(ClientError::Network("c".into())),
            Ok(answer("augmented answer")),
        ]));

        let runner = TestRunner::new(client, config);
        let questions = vec![question("1", crate::question::Category::Unknown)];
        let results = runner.run(&questions).await.unwrap();

        let result = &results.results()[0];
        assert!(!result.baseline.success);
        assert_eq!(result.baseline.error, "network error: c");
        assert!(result.togomcp.success);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let client = FakeClient::new(script(vec![
            Err(ClientError::InvalidRequest("bad prompt".into())),
            Ok(answer("augmented answer")),
        ]));

        let runner = TestRunner::new(client, fast_config());
        let questions = vec![question("1", crate::question::Category::Unknown)];
        let results = runner.run(&questions).await.unwrap();

        assert!(!results.results()[0].baseline.success);
        // One baseline attempt, one augmented attempt: no retries.
        assert_eq!(runner.client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_second_question_failure_leaves_first_unaffected() {
        let client = FakeClient::new(script(vec![
            Ok(answer("q1 baseline")),
            Ok(answer("q1 augmented")),
            Err(ClientError::Auth("key revoked".into())),
            Ok(answer("q2 augmented")),
        ]));

        let runner = TestRunner::new(client, fast_config());
        let questions = vec![
            question("1", crate::question::Category::Unknown),
            question("2", crate::question::Category::Unknown),
        ];
        let results = runner.run(&questions).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.results()[0].baseline.success);
        assert!(!results.results()[1].baseline.success);
        assert_eq!(
            results.results()[1].baseline.error,
            "authentication failed: key revoked"
        );
    }

    #[tokio::test]
    async fn test_tool_dedup_preserves_first_occurrence() {
        let client = FakeClient::new(script(vec![
            Ok(answer("baseline")),
            Ok(answer_with_tools(
                "augmented",
                &["search", "lookup_X", "search"],
            )),
        ]));

        let runner = TestRunner::new(client, fast_config());
        let questions = vec![question("1", crate::question::Category::Unknown)];
        let results = runner.run(&questions).await.unwrap();

        assert_eq!(results.results()[0].tools_used, vec!["search", "lookup_X"]);
        assert_eq!(results.results()[0].togomcp.tool_uses.len(), 3);
    }

    #[tokio::test]
    async fn test_baseline_never_records_tools() {
        let client = FakeClient::new(vec![]);
        let runner = TestRunner::new(client, fast_config());
        let questions = vec![question("1", crate::question::Category::Unknown)];
        let results = runner.run(&questions).await.unwrap();

        assert!(results.results()[0].baseline.tool_uses.is_empty());
    }

    #[tokio::test]
    async fn test_interruption_yields_strict_prefix() {
        // Token cancels during question 2's baseline call (call 3).
        // Question 2 still completes; question 3 is never started.
        let token = CancellationToken::new();
        let client = FakeClient::new(vec![]).cancelling_after(3, token.clone());

        let runner = TestRunner::new(client, fast_config()).with_cancellation(token);
        let questions: Vec<Question> = (1..=4)
            .map(|i| question(&i.to_string(), crate::question::Category::Unknown))
            .collect();

        let results = runner.run(&questions).await.unwrap();
        assert_eq!(results.len(), 2);
        let ids: Vec<&str> = results
            .results()
            .iter()
            .map(|r| r.question_id.as_str())
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
        // Only questions 1 and 2 ever invoked the client.
        assert_eq!(runner.client.call_count(), 4);
    }

    #[tokio::test]
    async fn test_interruption_flushes_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint_path = dir.path().join("intermediate.csv");

        let token = CancellationToken::new();
        let client = FakeClient::new(vec![]).cancelling_after(2, token.clone());

        let runner = TestRunner::new(client, fast_config())
            .with_cancellation(token)
            .with_checkpoint(CheckpointPolicy {
                interval: 100,
                path: checkpoint_path.clone(),
                format: ExportFormat::Csv,
            });

        let questions: Vec<Question> = (1..=3)
            .map(|i| question(&i.to_string(), crate::question::Category::Unknown))
            .collect();
        let results = runner.run(&questions).await.unwrap();

        assert_eq!(results.len(), 1);
        let flushed = ResultSet::load(&checkpoint_path).unwrap();
        assert_eq!(flushed, results);
    }

    #[tokio::test]
    async fn test_checkpoint_written_at_interval() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint_path = dir.path().join("intermediate.json");

        let client = FakeClient::new(vec![]);
        let runner = TestRunner::new(client, fast_config()).with_checkpoint(CheckpointPolicy {
            interval: 2,
            path: checkpoint_path.clone(),
            format: ExportFormat::Json,
        });

        let questions: Vec<Question> = (1..=5)
            .map(|i| question(&i.to_string(), crate::question::Category::Unknown))
            .collect();
        let results = runner.run(&questions).await.unwrap();

        assert_eq!(results.len(), 5);
        // Last snapshot happened after question 4.
        let snapshot = ResultSet::load(&checkpoint_path).unwrap();
        assert_eq!(snapshot.len(), 4);
    }

    #[tokio::test]
    async fn test_checkpoint_failure_does_not_abort_run() {
        let client = FakeClient::new(vec![]);
        let runner = TestRunner::new(client, fast_config()).with_checkpoint(CheckpointPolicy {
            interval: 1,
            path: PathBuf::from("/nonexistent-dir/intermediate.csv"),
            format: ExportFormat::Csv,
        });

        let questions = vec![question("1", crate::question::Category::Unknown)];
        let results = runner.run(&questions).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_transient_and_retried() {
        let config = RunConfig {
            retry_attempts: 1,
            ..fast_config()
        };
        let client = FakeClient::new(script(vec![
            Err(ClientError::Timeout(60)),
            Ok(answer("baseline")),
            Ok(answer("augmented")),
        ]));

        let runner = TestRunner::new(client, config);
        let questions = vec![question("1", crate::question::Category::Unknown)];
        let results = runner.run(&questions).await.unwrap();

        assert!(results.results()[0].baseline.success);
        assert_eq!(runner.client.call_count(), 3);
    }
}
