//! Ledger records: sessions, requests and reviews.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::enums::{ConflictResolution, Decision, RequestStatus, RiskTier};
use crate::types::{RequestId, ReviewId, SessionId, Timestamp};

/// A registered agent (or human) session.
///
/// The session's secret key is held by the ledger and never appears here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Agent name, e.g. `"BlueLake"`.
    pub agent_name: String,
    /// Program driving the agent, e.g. `"claude-code"`.
    pub program: String,
    /// Model identifier used for the different-model rule.
    pub model: String,
    /// Project the session was registered in.
    pub project_path: PathBuf,
    /// Whether this session belongs to a human reviewer.
    pub human: bool,
    /// Registration time.
    pub created_at: Timestamp,
    /// Last heartbeat.
    pub last_active: Timestamp,
    /// Set when the session is ended; ended sessions cannot authenticate.
    pub ended_at: Option<Timestamp>,
}

impl Session {
    /// Whether the session is still usable.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Why the requester wants to run the command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Justification {
    /// Why the command is needed.
    pub reason: String,
    /// What the command is expected to change.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub expected_effect: String,
    /// The larger goal this serves.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub goal: String,
    /// Why running it is safe.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub safety_argument: String,
}

/// Outcome of running an approved command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Process exit code (`-1` when the process could not be launched or was signalled).
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Per-run log file.
    pub log_path: Option<PathBuf>,
    /// Rollback capture directory, if one was taken.
    pub rollback_path: Option<PathBuf>,
    /// When execution finished.
    pub executed_at: Timestamp,
}

/// A command awaiting (or past) review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Request identifier.
    pub id: RequestId,
    /// The raw command.
    pub command: String,
    /// The command with secrets redacted, for display.
    pub display_command: String,
    /// Working directory for execution.
    pub cwd: PathBuf,
    /// Whether the command runs through a shell.
    pub shell: bool,
    /// Classified tier.
    pub risk_tier: RiskTier,
    /// Approvals needed.
    pub min_approvals: u32,
    /// Whether same-model reviews are held back.
    pub require_different_model: bool,
    /// Conflict policy snapshot taken at creation.
    pub conflict_resolution: ConflictResolution,
    /// Current state.
    pub status: RequestStatus,
    /// Session that opened the request.
    pub requester_session_id: SessionId,
    /// Agent name of the requester.
    pub requester_agent: String,
    /// Model of the requester.
    pub requester_model: String,
    /// Requester's justification.
    pub justification: Justification,
    /// Project the request belongs to.
    pub project_path: PathBuf,
    /// Non-destructive preview variant of the command, when one exists.
    pub dry_run_command: Option<String>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Deadline for reaching a decision.
    pub request_deadline: Timestamp,
    /// Deadline for executing once approved.
    pub approval_ttl_deadline: Option<Timestamp>,
    /// Whether the deadline has already been extended by escalation.
    pub escalated: bool,
    /// Whether the request is held on an approve/reject tie.
    pub awaiting_tie_break: bool,
    /// Reviews submitted before this instant no longer count. Set when an
    /// approval lapses and the request goes back for review.
    pub reviews_reset_at: Option<Timestamp>,
    /// When the request reached a terminal state.
    pub resolved_at: Option<Timestamp>,
    /// Execution outcome, once run.
    pub execution: Option<ExecutionRecord>,
}

/// A reviewer's signed vote on a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Review identifier.
    pub id: ReviewId,
    /// Reviewed request.
    pub request_id: RequestId,
    /// Reviewer session.
    pub reviewer_session_id: SessionId,
    /// Reviewer agent name.
    pub reviewer_agent: String,
    /// Reviewer model.
    pub reviewer_model: String,
    /// The vote.
    pub decision: Decision,
    /// Free-form comments (for rejections, the reason first).
    pub comments: String,
    /// Hex MAC over the vote, keyed by the reviewer's session key.
    pub signature: String,
    /// When the review was recorded.
    pub created_at: Timestamp,
}

impl Review {
    /// The bytes the reviewer's signature covers.
    #[must_use]
    pub fn signing_payload(request_id: &RequestId, decision: Decision, created_at: &Timestamp) -> Vec<u8> {
        format!("{}|{}|{}", request_id, decision, created_at.to_rfc3339()).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_justification_omits_empty_fields() {
        let j = Justification {
            reason: "clean build".into(),
            ..Justification::default()
        };
        let json = serde_json::to_value(&j).unwrap();
        assert_eq!(json, serde_json::json!({"reason": "clean build"}));
    }

    #[test]
    fn test_signing_payload_binds_all_parts() {
        let id = RequestId::new();
        let ts = Timestamp::now();
        let a = Review::signing_payload(&id, Decision::Approve, &ts);
        let b = Review::signing_payload(&id, Decision::Reject, &ts);
        assert_ne!(a, b);
        assert!(String::from_utf8(a).unwrap().starts_with(&id.to_string()));
    }
}
