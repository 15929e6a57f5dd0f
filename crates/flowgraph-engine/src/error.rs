//! Error types for the execution engine.
//!
//! `EngineError::to_step_error` projects any engine-internal failure onto the
//! `{code, retryable, message, step_run_id}` surface callers observe.

use flowgraph_model::{ModelError, StepError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("step execution error in '{step}': {message}")]
    StepExecution { step: String, message: String },

    #[error("no start step found in workflow")]
    NoStartStep,

    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("inheritance cycle detected at '{0}'")]
    InheritanceCycle(String),

    #[error("execution was cancelled")]
    Cancelled,

    #[error("sandbox timed out after {0}ms")]
    Timeout(u64),

    #[error("sandbox exceeded memory cap")]
    Memory,

    #[error("invalid execution state: {0}")]
    InvalidState(String),

    #[error("missing input data for step '{0}'")]
    MissingInput(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("expression error: {0}")]
    Expression(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("script error: {0}")]
    Script(#[from] StepError),

    #[error("max iterations exceeded: {0}")]
    MaxIterations(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Maps an engine error to the step error surface `{code, retryable,
    /// message, step_run_id}`.
    pub fn to_step_error(&self) -> StepError {
        match self {
            EngineError::Timeout(ms) => StepError::new("TIMEOUT", format!("sandbox timed out after {ms}ms")),
            EngineError::Memory => StepError::new("MEMORY", "sandbox exceeded memory cap"),
            EngineError::Script(e) => e.clone(),
            EngineError::MaxIterations(msg) => StepError::new("AGENT_001", msg.clone()),
            EngineError::Credential(msg) => StepError::new("CREDENTIAL_ERROR", msg.clone()),
            EngineError::Expression(msg) => StepError::new("EXPR_ERROR", msg.clone()),
            other => StepError::new("ENGINE_ERROR", other.to_string()),
        }
    }
}
