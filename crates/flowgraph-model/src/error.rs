//! Error types for the data model.

use thiserror::Error;

/// Primary error type for model-level operations (validation, lookups).
#[derive(Error, Debug, Clone)]
pub enum ModelError {
    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("invalid edge: {0}")]
    InvalidEdge(String),

    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// A structured error surfaced by a step run, per the error surface
/// `{code, retryable, message, step_run_id}`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StepError {
    pub code: String,
    pub retryable: bool,
    pub message: String,
    pub step_run_id: Option<String>,
}

impl StepError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            retryable: false,
            message: message.into(),
            step_run_id: None,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn with_step_run_id(mut self, id: impl Into<String>) -> Self {
        self.step_run_id = Some(id.into());
        self
    }

    /// Parses a `[CODE] message` prefixed script exception into a StepError.
    pub fn from_thrown(message: &str) -> Self {
        if let Some(rest) = message.strip_prefix('[') {
            if let Some(end) = rest.find(']') {
                let code = rest[..end].trim().to_string();
                let msg = rest[end + 1..].trim().to_string();
                if !code.is_empty() {
                    return Self::new(code, msg);
                }
            }
        }
        Self::new("SCRIPT_ERROR", message)
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for StepError {}
