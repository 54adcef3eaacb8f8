//! Error taxonomy for the decision engine.

use serde::Serialize;
use std::fmt;

use slb_audit::AuditError;
use slb_config::ConfigError;
use slb_core::{RateLimitAction, SessionId, Timestamp};
use slb_crypto::CryptoError;
use slb_storage::StorageError;

/// A rate-limit breach, carrying the configured action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitError {
    /// Session that hit the limit.
    pub session_id: SessionId,
    /// Currently pending requests.
    pub pending: u32,
    /// Pending cap (zero disables).
    pub max_pending: u32,
    /// Admissions in the current one-minute window.
    pub recent: u32,
    /// Per-minute cap (zero disables).
    pub max_per_minute: u32,
    /// When the per-minute window frees a slot, if that limit was hit.
    pub reset_at: Option<Timestamp>,
    /// What the limiter does about it.
    pub action: RateLimitAction,
}

impl RateLimitError {
    /// Whether the pending cap is the (or a) reason.
    #[must_use]
    pub fn pending_exceeded(&self) -> bool {
        self.max_pending > 0 && self.pending >= self.max_pending
    }

    /// Whether the per-minute cap is the (or a) reason.
    #[must_use]
    pub fn minute_exceeded(&self) -> bool {
        self.max_per_minute > 0 && self.recent >= self.max_per_minute
    }
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(2);
        if self.pending_exceeded() {
            parts.push(format!(
                "pending limit exceeded ({}/{})",
                self.pending, self.max_pending
            ));
        }
        if self.minute_exceeded() {
            parts.push(format!(
                "per-minute limit exceeded ({}/{})",
                self.recent, self.max_per_minute
            ));
        }
        if parts.is_empty() {
            f.write_str("rate limit exceeded")?;
        } else {
            f.write_str(&parts.join("; "))?;
        }
        if let Some(reset_at) = self.reset_at {
            write!(f, " (reset_at={})", reset_at.to_rfc3339())?;
        }
        Ok(())
    }
}

impl std::error::Error for RateLimitError {}

/// Errors returned by the decision engine.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// A required value is missing or malformed.
    #[error("{0}")]
    Validation(String),

    /// The presented session credentials are wrong.
    #[error("{0}")]
    Authentication(String),

    /// The caller is not allowed to do this (blocked agent, self-review).
    #[error("{0}")]
    Authorization(String),

    /// A referenced session or request does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// `"request"` or `"session"`.
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The rate limiter refused (or deferred) the request.
    #[error("{0}")]
    RateLimited(RateLimitError),

    /// A request or approval deadline has passed.
    #[error("{0}")]
    Timeout(String),

    /// The command could not be run, or ran and failed.
    #[error("{0}")]
    Execution(String),

    /// The request is already resolved, or a concurrent writer got there first.
    #[error("{0}")]
    Conflict(String),

    /// Ledger failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration could not be turned into an engine.
    #[error("config error: {0}")]
    Config(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApprovalError {
    /// Stable snake_case kind, used as `status` in JSON error output.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::Config(_) => "validation_error",
            Self::Authentication(_) => "authentication_error",
            Self::Authorization(_) => "authorization_error",
            Self::NotFound { .. } => "not_found",
            Self::RateLimited(_) => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Execution(_) => "execution_error",
            Self::Conflict(_) => "conflict",
            Self::Storage(_) => "storage_error",
            Self::Internal(_) => "internal_error",
        }
    }

    pub(crate) fn request_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "request",
            id: id.to_string(),
        }
    }

    pub(crate) fn session_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "session",
            id: id.to_string(),
        }
    }
}

impl From<StorageError> for ApprovalError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<AuditError> for ApprovalError {
    fn from(e: AuditError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<ConfigError> for ApprovalError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<CryptoError> for ApprovalError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::KeyMismatch | CryptoError::SignatureVerificationFailed => {
                Self::Authentication(e.to_string())
            },
            CryptoError::InvalidKeyLength { .. } | CryptoError::InvalidHexEncoding => {
                Self::Validation(format!("invalid session key: {e}"))
            },
        }
    }
}

impl From<RateLimitError> for ApprovalError {
    fn from(e: RateLimitError) -> Self {
        Self::RateLimited(e)
    }
}

/// Result type for engine operations.
pub type ApprovalResult<T> = Result<T, ApprovalError>;
