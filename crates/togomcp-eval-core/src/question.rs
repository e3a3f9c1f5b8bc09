//! Question records and the question-file loader.
//!
//! A question file is a JSON array; each record needs a `question`
//! text and may carry an identifier, category, reference answer,
//! notes, and a per-question MCP server override.

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{EvalError, Result};

/// URL of the run-wide default tool service.
pub const DEFAULT_MCP_URL: &str = "https://togomcp.rdfportal.org/mcp";

/// Fixed classification of the kind of reasoning/lookup a question
/// exercises. Unrecognised or absent labels fold into `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Category {
    Precision,
    Completeness,
    Integration,
    Currency,
    Specificity,
    StructuredQuery,
    #[default]
    Unknown,
}

impl Serialize for Category {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        match label.parse() {
            Ok(category) => Ok(category),
            Err(infallible) => match infallible {},
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Precision => "Precision",
            Category::Completeness => "Completeness",
            Category::Integration => "Integration",
            Category::Currency => "Currency",
            Category::Specificity => "Specificity",
            Category::StructuredQuery => "Structured Query",
            Category::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

impl FromStr for Category {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "Precision" => Category::Precision,
            "Completeness" => Category::Completeness,
            "Integration" => Category::Integration,
            "Currency" => Category::Currency,
            "Specificity" => Category::Specificity,
            "Structured Query" => Category::StructuredQuery,
            _ => Category::Unknown,
        })
    }
}

/// Descriptor of one remote MCP tool service attached to an
/// augmented invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpServerConfig {
    #[serde(rename = "type", default = "default_server_type")]
    pub server_type: String,
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_token: Option<String>,
}

fn default_server_type() -> String {
    "url".to_string()
}

impl McpServerConfig {
    /// The run-wide default: the public TogoMCP endpoint.
    pub fn togomcp_default() -> Vec<Self> {
        vec![Self {
            server_type: "url".to_string(),
            url: DEFAULT_MCP_URL.to_string(),
            name: "TogoMCP".to_string(),
            authorization_token: None,
        }]
    }
}

/// One evaluation question. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    /// Unique within a run; filled with the positional index when the
    /// input record carries none.
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: Option<String>,

    #[serde(default)]
    pub category: Category,

    /// The question text. Must be non-empty.
    pub question: String,

    /// Reference answer for manual scoring. Advisory only.
    #[serde(default)]
    pub expected_answer: String,

    #[serde(default)]
    pub notes: String,

    /// Per-question tool-service override. `None` means the run-wide
    /// default service is used for the augmented invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<Vec<McpServerConfig>>,
}

impl Question {
    /// Question id, guaranteed present after [`load_questions`].
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or("?")
    }
}

/// Accept a JSON string or number as the question identifier.
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    let raw: Option<RawId> = Option::deserialize(deserializer)?;
    Ok(raw.map(|id| match id {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    }))
}

/// Load and validate a question file.
///
/// Assigns positional identifiers to records without an `id`, and
/// rejects empty files and blank question texts.
pub fn load_questions(path: &Path) -> Result<Vec<Question>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| EvalError::Config(format!("failed to read question file {:?}: {}", path, e)))?;

    let mut questions: Vec<Question> = serde_json::from_str(&content)
        .map_err(|e| EvalError::Config(format!("invalid question file {:?}: {}", path, e)))?;

    if questions.is_empty() {
        return Err(EvalError::Config(format!(
            "question file {:?} contains no questions",
            path
        )));
    }

    for (index, question) in questions.iter_mut().enumerate() {
        if question.question.trim().is_empty() {
            return Err(EvalError::Config(format!(
                "question at index {} has empty text",
                index
            )));
        }
        if question.id.is_none() {
            question.id = Some(index.to_string());
        }
    }

    Ok(questions)
}
