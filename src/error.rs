//! Error types for the grading pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, GraderError>;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Config,
    Extraction,
    Embedding,
    Indexing,
    Grading,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Extraction => "extraction",
            Stage::Embedding => "embedding",
            Stage::Indexing => "indexing",
            Stage::Grading => "grading",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while evaluating a submission.
#[derive(Error, Debug)]
pub enum GraderError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A loosely-typed submission record lacks a required field.
    #[error("Invalid submission record: {0}")]
    InvalidRecord(String),

    /// A submission file is missing or is not a readable PDF.
    #[error("Failed to extract text from '{path}': {message}")]
    Extraction { path: PathBuf, message: String },

    /// The embedding model could not be loaded or run.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The vector index could not be built.
    #[error("Index build error: {0}")]
    IndexBuild(String),

    /// A submission key cannot be mapped to an index directory.
    #[error("Invalid submission key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// No persisted index exists at the location.
    #[error("Index not found at '{0}'")]
    IndexNotFound(PathBuf),

    /// The LLM endpoint returned an error status.
    #[error("LLM API error ({}): {message}", display_status(.status))]
    LlmApi {
        status: Option<u16>,
        message: String,
    },

    /// HTTP transport error (connection, timeout, body decoding).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The LLM response envelope could not be parsed.
    #[error("Failed to parse LLM response: {0}")]
    LlmParse(String),

    /// No schema-valid evaluation could be obtained from the model.
    #[error("Grading failed after {attempts} attempt(s): {message}")]
    Grading {
        attempts: usize,
        message: String,
        /// Last raw model output, kept for diagnostics.
        last_response: Option<String>,
    },
}

fn display_status(status: &Option<u16>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "no status".to_string())
}

impl GraderError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an extraction error for a path.
    pub fn extraction(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Extraction {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Pipeline stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            GraderError::Config(_) | GraderError::InvalidRecord(_) => Stage::Config,
            GraderError::Extraction { .. } => Stage::Extraction,
            GraderError::Embedding(_) => Stage::Embedding,
            GraderError::Io { .. }
            | GraderError::Serialization(_)
            | GraderError::IndexBuild(_)
            | GraderError::InvalidKey { .. }
            | GraderError::IndexNotFound(_) => Stage::Indexing,
            GraderError::LlmApi { .. }
            | GraderError::Http(_)
            | GraderError::LlmParse(_)
            | GraderError::Grading { .. } => Stage::Grading,
        }
    }

    /// Whether an LLM request failure may succeed if simply repeated.
    ///
    /// Transport errors, rate limiting and server errors are transient.
    /// Authentication and other client errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            GraderError::Http(_) | GraderError::LlmParse(_) => true,
            GraderError::LlmApi { status, .. } => match status {
                Some(code) => *code == 429 || *code >= 500,
                None => true,
            },
            _ => false,
        }
    }

    /// Whether the failure is systemic and should stop a whole batch.
    pub fn is_systemic(&self) -> bool {
        matches!(self, GraderError::Embedding(_) | GraderError::Config(_))
    }
}

impl From<reqwest::Error> for GraderError {
    fn from(err: reqwest::Error) -> Self {
        GraderError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for GraderError {
    fn from(err: serde_json::Error) -> Self {
        GraderError::LlmParse(err.to_string())
    }
}
