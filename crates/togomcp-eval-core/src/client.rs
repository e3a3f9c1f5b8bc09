//! Invocation client boundary: one operation, "generate a response".
//!
//! The runner only sees the [`InvocationClient`] trait, so the retry
//! policy can be exercised against a scripted fake without a network.
//! [`AnthropicClient`] is the production implementation over the
//! Messages API, with remote MCP servers attached for augmented calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::RunConfig;
use crate::error::EvalError;
use crate::question::McpServerConfig;

/// Default Messages API endpoint.
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Current API version.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Beta header required for the remote MCP connector.
const MCP_BETA: &str = "mcp-client-2025-04-04";

/// Environment variable holding the API credential.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// A single tool call the model elected to make. Arguments stay an
/// open JSON mapping so heterogeneous tool services need no schema
/// changes here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Parameters for one model call.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub system_prompt: String,
    pub question: String,
    /// Tool services offered to the model. Empty means tools are
    /// disabled for this call (baseline mode).
    pub mcp_servers: Vec<McpServerConfig>,
}

/// Successful response from one model call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Tool calls in the order the model made them. Always empty when
    /// the request offered no tools.
    pub tool_uses: Vec<ToolInvocation>,
}

/// Failure modes of a single invocation attempt.
///
/// [`is_transient`](Self::is_transient) partitions these into the
/// retried class (timeout, network, rate-limit, server-side) and the
/// recorded-immediately class (bad request, auth, parse).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl ClientError {
    /// Whether the retry policy should attempt this call again.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Timeout(_) | ClientError::Network(_) | ClientError::RateLimited(_) => true,
            ClientError::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            ClientError::Auth(_) | ClientError::InvalidRequest(_) | ClientError::Parse(_) => false,
        }
    }
}

/// The single operation the runner depends on.
#[async_trait]
pub trait InvocationClient: Send + Sync {
    async fn generate(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationResponse, ClientError>;
}

/// Messages API client.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicClient {
    /// Build a client from a resolved run configuration and credential.
    pub fn new(config: &RunConfig, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: ANTHROPIC_API_URL.to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Build a client reading the credential from `ANTHROPIC_API_KEY`.
    ///
    /// A missing credential is a fatal precondition for the run, not a
    /// per-question failure.
    pub fn from_env(config: &RunConfig) -> Result<Self, EvalError> {
        Self::with_api_key(config, std::env::var(API_KEY_ENV).ok())
    }

    fn with_api_key(config: &RunConfig, api_key: Option<String>) -> Result<Self, EvalError> {
        let api_key = api_key.ok_or_else(|| {
            EvalError::Config(format!("{} environment variable not set", API_KEY_ENV))
        })?;
        Ok(Self::new(config, api_key))
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_request_body(&self, request: &InvocationRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": request.system_prompt,
            "messages": [{"role": "user", "content": request.question}],
        });

        if !request.mcp_servers.is_empty() {
            body["mcp_servers"] = serde_json::json!(request.mcp_servers);
        }

        body
    }

    fn parse_response(body: &str) -> Result<InvocationResponse, ClientError> {
        let api_response: ApiResponse = serde_json::from_str(body)
            .map_err(|e| ClientError::Parse(format!("unexpected response shape: {}", e)))?;

        let mut text_parts = Vec::new();
        let mut tool_uses = Vec::new();

        for block in api_response.content {
            match block {
                ApiContentBlock::Text { text } => text_parts.push(text),
                ApiContentBlock::ToolUse { name, input }
                | ApiContentBlock::McpToolUse { name, input } => {
                    tool_uses.push(ToolInvocation {
                        name,
                        arguments: input,
                    });
                }
                ApiContentBlock::Other => {}
            }
        }

        Ok(InvocationResponse {
            text: text_parts.join("\n"),
            input_tokens: api_response.usage.input_tokens,
            output_tokens: api_response.usage.output_tokens,
            tool_uses,
        })
    }

    fn status_error(status: u16, body: &str) -> ClientError {
        // The API wraps failures as {"error": {"type": ..., "message": ...}}.
        let message = serde_json::from_str::<ApiErrorEnvelope>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.chars().take(200).collect());

        match status {
            401 | 403 => ClientError::Auth(message),
            429 => ClientError::RateLimited(message),
            400 | 404 | 422 => ClientError::InvalidRequest(message),
            _ => ClientError::Api { status, message },
        }
    }
}

#[async_trait]
impl InvocationClient for AnthropicClient {
    async fn generate(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationResponse, ClientError> {
        let body = self.build_request_body(request);

        debug!(
            tools = !request.mcp_servers.is_empty(),
            model = %self.model,
            "sending invocation"
        );

        let mut http_request = self
            .http
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json");

        if !request.mcp_servers.is_empty() {
            http_request = http_request.header("anthropic-beta", MCP_BETA);
        }

        let response = http_request
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body_text = response
            .text()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        if status != 200 {
            return Err(Self::status_error(status, &body_text));
        }

        Self::parse_response(&body_text)
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ApiContentBlock>,
    usage: ApiUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
    McpToolUse {
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}
