//! Audit-related error types.

use thiserror::Error;

/// Errors that can occur with audit logging.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Storage error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// A stored entry could not be decoded.
    #[error("corrupt audit entry {entry_id}: {reason}")]
    CorruptEntry {
        /// The offending entry.
        entry_id: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl From<slb_storage::StorageError> for AuditError {
    fn from(e: slb_storage::StorageError) -> Self {
        Self::StorageError(e.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
