//! # Error Taxonomy
//!
//! Every failure the store can report, with a stable wire code per kind.
//! Validation kinds ([`ErrorCode::NoSuchTable`], [`ErrorCode::InvalidRequest`],
//! [`ErrorCode::UnknownAction`]) are raised before any side-effecting call.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable error codes, serialized as `SCREAMING_SNAKE_CASE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoSuchTable,
    InvalidRequest,
    DocumentSaveError,
    DocumentGetError,
    DocumentNotFound,
    UnknownAction,
    ExecutionTimeout,
    CacheUnavailable,
    ExecutorRejected,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSuchTable => "NO_SUCH_TABLE",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::DocumentSaveError => "DOCUMENT_SAVE_ERROR",
            Self::DocumentGetError => "DOCUMENT_GET_ERROR",
            Self::DocumentNotFound => "DOCUMENT_NOT_FOUND",
            Self::UnknownAction => "UNKNOWN_ACTION",
            Self::ExecutionTimeout => "EXECUTION_TIMEOUT",
            Self::CacheUnavailable => "CACHE_UNAVAILABLE",
            Self::ExecutorRejected => "EXECUTOR_REJECTED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for query store operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryStoreError {
    #[error("No such table: {0}")]
    NoSuchTable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// `saved` lists the ids that reached both the raw store and the index.
    /// Empty means nothing was written.
    #[error("Save failed for table '{table}': {message} ({} saved)", .saved.len())]
    DocumentSaveError {
        table: String,
        message: String,
        saved: Vec<String>,
    },

    #[error("Get failed for table '{table}': {message}")]
    DocumentGetError { table: String, message: String },

    #[error("Document not found: {table}/{id}")]
    DocumentNotFound { table: String, id: String },

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Execution timed out after {0} ms")]
    ExecutionTimeout(u64),

    #[error("Result cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Executor rejected submission: {0}")]
    ExecutorRejected(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for query store operations.
pub type Result<T> = std::result::Result<T, QueryStoreError>;

impl QueryStoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NoSuchTable(_) => ErrorCode::NoSuchTable,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::DocumentSaveError { .. } => ErrorCode::DocumentSaveError,
            Self::DocumentGetError { .. } => ErrorCode::DocumentGetError,
            Self::DocumentNotFound { .. } => ErrorCode::DocumentNotFound,
            Self::UnknownAction(_) => ErrorCode::UnknownAction,
            Self::ExecutionTimeout(_) => ErrorCode::ExecutionTimeout,
            Self::CacheUnavailable(_) => ErrorCode::CacheUnavailable,
            Self::ExecutorRejected(_) => ErrorCode::ExecutorRejected,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueryStoreError::DocumentNotFound {
            table: "events".into(),
            id: "X".into(),
        };
        assert_eq!(err.to_string(), "Document not found: events/X");
    }

    #[test]
    fn test_save_error_reports_saved_count() {
        let err = QueryStoreError::DocumentSaveError {
            table: "events".into(),
            message: "index rejected 1 document".into(),
            saved: vec!["A".into(), "B".into()],
        };
        assert!(err.to_string().ends_with("(2 saved)"));
    }

    #[test]
    fn test_code_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::NoSuchTable).unwrap();
        assert_eq!(json, "\"NO_SUCH_TABLE\"");
        assert_eq!(ErrorCode::DocumentNotFound.to_string(), "DOCUMENT_NOT_FOUND");
    }
}
