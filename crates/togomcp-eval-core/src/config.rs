//! Run configuration: model identity, sampling limits, prompts, and
//! the retry/timeout/checkpoint policy.
//!
//! Loaded once before a run and immutable afterwards. Every field
//! except `model` has a documented default; a configuration file only
//! needs to name the fields it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EvalError, Result};

/// Default system prompt for baseline (no-tools) invocations.
pub const DEFAULT_BASELINE_PROMPT: &str = "Answer using only your training knowledge. \
     Do not use any database tools or external resources. \
     If you don't know something with certainty, say so.";

/// Default system prompt for TogoMCP-augmented invocations.
pub const DEFAULT_TOGOMCP_PROMPT: &str = "You have access to biological databases through MCP tools. \
     Use them when they would improve the accuracy or completeness of your answer.";

/// Configuration for an evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Model identifier. The only field without a default.
    pub model: String,

    /// Maximum output tokens per invocation.
    pub max_tokens: u32,

    /// Sampling temperature.
    pub temperature: f32,

    /// System prompt for baseline invocations.
    pub baseline_system_prompt: String,

    /// System prompt for augmented invocations.
    pub togomcp_system_prompt: String,

    /// Per-invocation timeout in seconds. Exceeding it counts as a
    /// transient failure eligible for retry.
    pub timeout: u64,

    /// Number of additional attempts after a transient failure.
    /// A call that fails transiently `retry_attempts` times and then
    /// succeeds is recorded as a success.
    pub retry_attempts: u32,

    /// Delay between retry attempts, in seconds.
    pub retry_delay: u64,

    /// Persist accumulated results after every N completed questions.
    pub checkpoint_interval: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: 4000,
            temperature: 1.0,
            baseline_system_prompt: DEFAULT_BASELINE_PROMPT.to_string(),
            togomcp_system_prompt: DEFAULT_TOGOMCP_PROMPT.to_string(),
            timeout: 60,
            retry_attempts: 3,
            retry_delay: 2,
            checkpoint_interval: 5,
        }
    }
}

impl RunConfig {
    /// Defaults with the given model.
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Load configuration from an optional JSON file.
    ///
    /// Fields absent from the file keep their defaults. `None` yields
    /// plain defaults (which still fail [`validate`](Self::validate)
    /// until a model is supplied).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p).map_err(|e| {
                    EvalError::Config(format!("failed to read config file {:?}: {}", p, e))
                })?;
                serde_json::from_str(&content).map_err(|e| {
                    EvalError::Config(format!("invalid config file {:?}: {}", p, e))
                })?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    /// Check that the configuration is fully resolved for a run.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(EvalError::Config(
                "model must be set (no default model identifier)".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(EvalError::Config("max_tokens must be positive".to_string()));
        }
        if self.timeout == 0 {
            return Err(EvalError::Config("timeout must be positive".to_string()));
        }
        if self.checkpoint_interval == 0 {
            return Err(EvalError::Config(
                "checkpoint_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = RunConfig::default();
        assert_eq!(config.max_tokens, 4000);
        assert_eq!(config.temperature, 1.0);
        assert_eq!(config.timeout, 60);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay, 2);
        assert_eq!(config.checkpoint_interval, 5);
        assert_eq!(config.baseline_system_prompt, DEFAULT_BASELINE_PROMPT);
        assert_eq!(config.togomcp_system_prompt, DEFAULT_TOGOMCP_PROMPT);
    }

    #[test]
    fn test_load_overlays_file_onto_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"model": "claude-sonnet-4-20250514", "max_tokens": 1024}}"#
        )
        .unwrap();

        let config = RunConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.model, "claude-sonnet-4-20250514");
        assert_eq!(config.max_tokens, 1024);
        // Untouched fields keep defaults.
        assert_eq!(config.timeout, 60);
        assert_eq!(config.retry_attempts, 3);
    }

    #[test]
    fn test_load_none_yields_defaults() {
        let config = RunConfig::load(None).unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn test_load_invalid_json_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = RunConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = RunConfig::load(Some(Path::new("/nonexistent/config.json"))).unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }

    #[test]
    fn test_validate_requires_model() {
        let config = RunConfig::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));

        let config = RunConfig::for_model("claude-sonnet-4-20250514");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = RunConfig {
            timeout: 0,
            ..RunConfig::for_model("m")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_checkpoint_interval() {
        // A zero interval would make the runner's modulo check divide
        // by zero mid-run; it must be caught before any invocation.
        let config = RunConfig {
            checkpoint_interval: 0,
            ..RunConfig::for_model("m")
        };
        assert!(matches!(config.validate(), Err(EvalError::Config(_))));
    }
}
