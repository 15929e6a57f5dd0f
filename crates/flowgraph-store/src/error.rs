//! Database error types.

use flowgraph_engine::EngineError;
use thiserror::Error;

/// Database operation errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Entity not found.
    #[error("Entity not found")]
    NotFound,

    /// Duplicate key violation.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Invalid data.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Model-level (de)serialization/validation error.
    #[error("model error: {0}")]
    ModelError(#[from] flowgraph_model::ModelError),

    /// SQLx error.
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),
}

impl DbError {
    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Check if this is a duplicate key error.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey(_))
    }
}

/// Lets the Postgres-backed stores implement `flowgraph_engine`'s
/// `WorkflowStore`/`RunStore` traits, whose methods return `EngineError`.
impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        EngineError::Storage(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
