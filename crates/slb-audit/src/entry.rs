//! Audit entry types and actions.
//!
//! Every request, review and execution transition is recorded as an audit
//! entry. Entries are chain-linked: each carries the hash of its predecessor,
//! and its own hash covers that link.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use slb_core::{
    Decision, RateLimitAction, RequestId, RequestStatus, RiskTier, SessionId, TimeoutAction,
    Timestamp,
};
use slb_crypto::ContentHash;

/// Derivation context for entry hashes.
const HASH_DOMAIN: &str = "slb 2024 audit entry v1";

/// Unique identifier for an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditEntryId(pub Uuid);

impl AuditEntryId {
    /// Create a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AuditEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuditEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "audit:{}", self.0)
    }
}

/// A single audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry identifier.
    pub id: AuditEntryId,
    /// Append position in the ledger (zero until stored).
    pub sequence: i64,
    /// When the audited event happened.
    pub timestamp: Timestamp,
    /// Request the event concerns.
    pub request_id: Option<RequestId>,
    /// Session that caused the event; `None` for system actions such as timeouts.
    pub actor: Option<SessionId>,
    /// The action being audited.
    pub action: AuditAction,
    /// Hash of the previous entry (chain linking).
    pub previous_hash: ContentHash,
    /// Hash of this entry's contents, including `previous_hash`.
    pub content_hash: ContentHash,
}

impl AuditEntry {
    /// Build an entry linked to `previous_hash` and compute its hash.
    #[must_use]
    pub fn create(
        request_id: Option<RequestId>,
        actor: Option<SessionId>,
        action: AuditAction,
        previous_hash: ContentHash,
        timestamp: Timestamp,
    ) -> Self {
        let mut entry = Self {
            id: AuditEntryId::new(),
            sequence: 0,
            timestamp,
            request_id,
            actor,
            action,
            previous_hash,
            content_hash: ContentHash::zero(),
        };
        entry.content_hash = entry.compute_hash();
        entry
    }

    /// The bytes covered by the content hash.
    #[must_use]
    pub fn hashing_data(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(self.id.0.as_bytes());
        data.extend_from_slice(self.timestamp.to_rfc3339().as_bytes());
        if let Some(req) = &self.request_id {
            data.extend_from_slice(req.0.as_bytes());
        }
        data.push(0);
        if let Some(actor) = &self.actor {
            data.extend_from_slice(actor.0.as_bytes());
        }
        data.push(0);
        // Action is serialized to JSON for consistent hashing
        if let Ok(action_json) = serde_json::to_vec(&self.action) {
            data.extend_from_slice(&action_json);
        }
        data.extend_from_slice(self.previous_hash.as_bytes());
        data
    }

    /// Recompute the hash from the current contents.
    #[must_use]
    pub fn compute_hash(&self) -> ContentHash {
        ContentHash::hash_with_domain(HASH_DOMAIN, &self.hashing_data())
    }

    /// Whether the stored hash still matches the contents.
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.content_hash == self.compute_hash()
    }

    /// Check if this entry follows another (chain linking).
    #[must_use]
    pub fn follows(&self, previous: &AuditEntry) -> bool {
        self.previous_hash == previous.content_hash
    }
}

/// Actions that can be audited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditAction {
    /// A session registered.
    SessionStarted {
        /// Agent name.
        agent: String,
        /// Model identifier.
        model: String,
        /// Whether the session is a human reviewer.
        human: bool,
    },

    /// A session ended.
    SessionEnded {
        /// Agent name.
        agent: String,
    },

    /// Rate-limit counters were reset for a session.
    RateLimitsReset,

    /// A request was refused or flagged by the rate limiter.
    RateLimited {
        /// Configured breach action.
        action: RateLimitAction,
        /// Limiter message.
        message: String,
        /// Whether the request was still admitted (`warn`).
        admitted: bool,
    },

    /// A non-safe request was opened.
    RequestCreated {
        /// Redacted command.
        command: String,
        /// Classified tier.
        tier: RiskTier,
        /// Approvals required.
        min_approvals: u32,
        /// Whether same-model reviews are held back.
        require_different_model: bool,
    },

    /// A safe command bypassed review.
    RequestSkipped {
        /// Redacted command.
        command: String,
        /// Classified tier.
        tier: RiskTier,
        /// Soft window the caller waits before executing.
        auto_approve_delay_secs: u64,
    },

    /// A review was recorded.
    ReviewSubmitted {
        /// Decision.
        decision: Decision,
        /// Whether the review counted toward quorum when submitted.
        counted: bool,
        /// Eligible approvals after this review.
        approvals: u32,
        /// Eligible rejections after this review.
        rejections: u32,
    },

    /// The request changed state.
    StatusChanged {
        /// Previous state.
        from: RequestStatus,
        /// New state.
        to: RequestStatus,
        /// Why.
        reason: String,
    },

    /// The request deadline passed and the timeout action ran.
    TimeoutApplied {
        /// The configured action.
        action: TimeoutAction,
        /// Status after the action.
        new_status: RequestStatus,
        /// Always `false`: the request was still reviewed, just not in time.
        skipped_approval: bool,
        /// `true` only for `auto_approve_warn`.
        approved_on_timeout: bool,
    },

    /// The deadline was extended by escalation.
    DeadlineExtended {
        /// New deadline.
        deadline: Timestamp,
    },

    /// An approval lapsed before execution and the request reverted to pending.
    ApprovalExpired,

    /// Pre-execution rollback state was captured.
    RollbackCaptured {
        /// Capture directory.
        path: String,
        /// Bytes archived.
        size_bytes: u64,
    },

    /// Rollback capture was abandoned; execution continued.
    RollbackSkipped {
        /// Why the capture was abandoned.
        reason: String,
    },

    /// A rollback capture was restored.
    RollbackRestored {
        /// Capture directory.
        path: String,
        /// Files written back.
        files: u64,
    },

    /// The command finished running.
    ExecutionFinished {
        /// Process exit code.
        exit_code: i32,
        /// Wall-clock duration.
        duration_ms: u64,
        /// Terminal status recorded.
        status: RequestStatus,
    },
}

impl AuditAction {
    /// One-line human-readable description.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::SessionStarted { agent, model, .. } => {
                format!("Session started for {agent} ({model})")
            },
            Self::SessionEnded { agent } => format!("Session ended for {agent}"),
            Self::RateLimitsReset => "Rate limits reset".to_string(),
            Self::RateLimited { message, admitted, .. } => {
                if *admitted {
                    format!("Rate limit warning: {message}")
                } else {
                    format!("Rate limited: {message}")
                }
            },
            Self::RequestCreated { command, tier, .. } => {
                format!("Request opened ({tier}): {command}")
            },
            Self::RequestSkipped { command, .. } => format!("Safe command skipped review: {command}"),
            Self::ReviewSubmitted {
                decision,
                approvals,
                rejections,
                ..
            } => format!("Review {decision} ({approvals} approve / {rejections} reject)"),
            Self::StatusChanged { from, to, reason } => format!("{from} -> {to}: {reason}"),
            Self::TimeoutApplied {
                action, new_status, ..
            } => format!("Timed out ({action}) -> {new_status}"),
            Self::DeadlineExtended { deadline } => format!("Deadline extended to {deadline}"),
            Self::ApprovalExpired => "Approval expired before execution".to_string(),
            Self::RollbackCaptured { path, .. } => format!("Rollback captured at {path}"),
            Self::RollbackSkipped { reason } => format!("Rollback capture skipped: {reason}"),
            Self::RollbackRestored { path, files } => format!("Restored {files} files from {path}"),
            Self::ExecutionFinished {
                exit_code, status, ..
            } => format!("Executed with exit code {exit_code} -> {status}"),
        }
    }
}
