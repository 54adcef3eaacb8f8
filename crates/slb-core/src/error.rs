//! Error types for core value parsing.

use thiserror::Error;

/// Errors raised while parsing or validating core values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A string could not be parsed into the named field's type.
    #[error("invalid {field}: {value:?}")]
    InvalidValue {
        /// Field or type being parsed.
        field: &'static str,
        /// The offending input.
        value: String,
    },

    /// Filesystem error while resolving SLB directories.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
