//! Error types for the evaluation harness.
//!
//! Per-question invocation failures are not represented here — they are
//! captured into [`crate::store::InvocationOutcome`] records and never
//! abort a run. This module covers the fatal categories only.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvalError {
    /// Invalid or missing configuration, question file, or credential.
    /// Fatal: detected before any invocation is made.
    #[error("configuration error: {0}")]
    Config(String),

    /// A result file could not be written or read back.
    /// Fatal to the export/load step only; in-memory results survive.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, EvalError>;
