//! Result and error types for the core library

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Core library error type
///
/// Structural decode failures carry the id of the batch that was persisted
/// in `error` status, when one exists, so callers can inspect it later.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported statement format: {format}")]
    UnsupportedFormat {
        batch_id: Option<Uuid>,
        format: String,
    },

    #[error("Malformed statement file: {reason}")]
    MalformedFile {
        batch_id: Option<Uuid>,
        reason: String,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Category not found: {0}")]
    CategoryNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Attach a batch id to a structural decode error. Other variants are
    /// returned unchanged.
    pub fn with_batch(self, id: Uuid) -> Self {
        match self {
            Self::UnsupportedFormat { format, .. } => Self::UnsupportedFormat {
                batch_id: Some(id),
                format,
            },
            Self::MalformedFile { reason, .. } => Self::MalformedFile {
                batch_id: Some(id),
                reason,
            },
            other => other,
        }
    }

    /// Batch id carried by a structural decode error
    pub fn batch_id(&self) -> Option<Uuid> {
        match self {
            Self::UnsupportedFormat { batch_id, .. } | Self::MalformedFile { batch_id, .. } => {
                *batch_id
            }
            _ => None,
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::MalformedFile { .. } => "malformed_file",
            Self::AccountNotFound(_) => "account_not_found",
            Self::CategoryNotFound(_) => "category_not_found",
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Validation(_) => "validation",
            Self::Config(_) => "config",
            Self::Database(_) => "database",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}

impl From<duckdb::Error> for Error {
    fn from(e: duckdb::Error) -> Self {
        Self::Database(e.to_string())
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;

/// Operation result with optional context (for JSON output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub context: Option<HashMap<String, serde_json::Value>>,
}

impl<T> OperationResult<T> {
    /// Create a successful result
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            context: None,
        }
    }

    /// Create a failed result
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: None,
        }
    }

    /// Create a failed result with context
    pub fn fail_with_context(
        error: impl Into<String>,
        context: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: Some(context),
        }
    }

    /// Build a failed result from a core error, recording its code and
    /// any batch id in the context.
    pub fn from_error(error: &Error) -> Self {
        let mut context = HashMap::new();
        context.insert("code".to_string(), serde_json::json!(error.code()));
        if let Some(batch_id) = error.batch_id() {
            context.insert("batch_id".to_string(), serde_json::json!(batch_id));
        }
        Self::fail_with_context(error.to_string(), context)
    }
}

impl<T> From<Result<T>> for OperationResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::from_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_result_ok() {
        let result: OperationResult<i32> = OperationResult::ok(42);
        assert!(result.success);
        assert_eq!(result.data, Some(42));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_with_batch_only_touches_decode_errors() {
        let id = Uuid::new_v4();
        let err = Error::MalformedFile {
            batch_id: None,
            reason: "not text".to_string(),
        }
        .with_batch(id);
        assert_eq!(err.batch_id(), Some(id));

        let err = Error::validation("bad").with_batch(id);
        assert_eq!(err.batch_id(), None);
    }

    #[test]
    fn test_from_result_records_code_and_batch() {
        let id = Uuid::new_v4();
        let err: Result<i32> = Err(Error::UnsupportedFormat {
            batch_id: Some(id),
            format: "qif".to_string(),
        });
        let result: OperationResult<i32> = err.into();
        assert!(!result.success);
        let context = result.context.unwrap();
        assert_eq!(context["code"], "unsupported_format");
        assert_eq!(context["batch_id"], serde_json::json!(id));
        assert!(result.error.unwrap().contains("qif"));
    }
}
