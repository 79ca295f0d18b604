use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::{EntityRef, VertexId};
use crate::transaction::TxnId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("{0} not found")]
    EntityNotFound(EntityRef),

    #[error("{0} already exists")]
    DuplicateId(EntityRef),

    #[error("vertex {0} must carry at least one label")]
    EmptyLabels(VertexId),

    #[error("unknown transaction {0}")]
    InvalidTransaction(TxnId),

    #[error("commit failed: {0}")]
    CommitError(String),

    #[error("undo failed: {0}")]
    UndoError(String),

    #[error("redo failed: {0}")]
    RedoError(String),

    #[error("index corruption: {0}")]
    IndexCorruption(String),
}

impl GraphError {
    /// Stable short code stored on a transaction when this error is recorded.
    pub fn code(&self) -> &'static str {
        match self {
            GraphError::EntityNotFound(_) => "entity_not_found",
            GraphError::DuplicateId(_) => "duplicate_id",
            GraphError::EmptyLabels(_) => "empty_labels",
            GraphError::InvalidTransaction(_) => "invalid_transaction",
            GraphError::CommitError(_) => "commit_error",
            GraphError::UndoError(_) => "undo_error",
            GraphError::RedoError(_) => "redo_error",
            GraphError::IndexCorruption(_) => "index_corruption",
        }
    }
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Failure recorded on a transaction. Sticky until a commit succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxnError {
    pub code: String,
    pub message: String,
    /// Raw cause as reported by the failing layer (server body, inner error).
    #[serde(default)]
    pub cause: Option<Value>,
}

impl TxnError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<Value>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

impl From<&GraphError> for TxnError {
    fn from(err: &GraphError) -> Self {
        TxnError::new(err.code(), err.to_string())
    }
}
