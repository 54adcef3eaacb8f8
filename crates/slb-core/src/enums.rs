//! Closed vocabularies: risk tiers, request states, decisions and policies.
//!
//! Every enum here has a stable `snake_case` string form used in the ledger,
//! in configuration files, and in JSON output.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// Stable string form.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(CoreError::InvalidValue {
                        field: $field,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(
    /// Risk tier assigned to a command by classification.
    ///
    /// Tiers are evaluated in the fixed priority order of [`RiskTier::PRIORITY`].
    RiskTier, "risk_tier" {
        /// Irreversible, wide blast radius. Needs the most approvals.
        Critical => "critical",
        /// Destructive but scoped.
        Dangerous => "dangerous",
        /// Mildly destructive; usually a soft approval window.
        Caution => "caution",
        /// Runs without review.
        Safe => "safe",
    }
);

impl RiskTier {
    /// Evaluation order for classification, highest severity first.
    pub const PRIORITY: [Self; 4] = [Self::Critical, Self::Dangerous, Self::Caution, Self::Safe];

    /// Severity rank; higher is more dangerous.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::Critical => 3,
            Self::Dangerous => 2,
            Self::Caution => 1,
            Self::Safe => 0,
        }
    }

    /// The more severe of two tiers.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

string_enum!(
    /// Lifecycle state of a request.
    RequestStatus, "status" {
        /// Awaiting reviews.
        Pending => "pending",
        /// Quorum reached; may be executed until the approval TTL lapses.
        Approved => "approved",
        /// Blocked by review or timeout policy.
        Rejected => "rejected",
        /// Withdrawn by the requester.
        Cancelled => "cancelled",
        /// Deadline passed without a decision.
        Timeout => "timeout",
        /// Claimed by an executor.
        Executing => "executing",
        /// Command ran and exited zero.
        Executed => "executed",
        /// Command exited non-zero or failed to launch.
        ExecutionFailed => "execution_failed",
    }
);

impl RequestStatus {
    /// Terminal states never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Cancelled | Self::Timeout | Self::Executed | Self::ExecutionFailed
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `Approved -> Pending` is the approval-TTL revert.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Approved | Self::Rejected | Self::Cancelled | Self::Timeout
            ) | (Self::Approved, Self::Executing | Self::Pending | Self::Cancelled)
                | (Self::Executing, Self::Executed | Self::ExecutionFailed)
        )
    }
}

string_enum!(
    /// A reviewer's vote.
    Decision, "decision" {
        /// Vote to allow execution.
        Approve => "approve",
        /// Vote to block execution.
        Reject => "reject",
    }
);

string_enum!(
    /// How mixed approve/reject votes are reconciled.
    ConflictResolution, "conflict_resolution" {
        /// A single rejection blocks the request.
        AnyRejectionBlocks => "any_rejection_blocks",
        /// Whichever side first reaches the quorum decides.
        FirstWins => "first_wins",
        /// Ties are held until a human reviewer votes.
        HumanBreaksTie => "human_breaks_tie",
    }
);

string_enum!(
    /// What happens when a pending request reaches its deadline.
    TimeoutAction, "timeout_action" {
        /// Extend the deadline once and re-notify.
        Escalate => "escalate",
        /// Reject with reason "timeout".
        AutoReject => "auto_reject",
        /// Approve, loudly flagged in the audit trail.
        AutoApproveWarn => "auto_approve_warn",
    }
);

string_enum!(
    /// What the rate limiter does on breach.
    RateLimitAction, "rate_limit_action" {
        /// Deny outright.
        Reject => "reject",
        /// Ask the caller to retry later.
        Queue => "queue",
        /// Admit, but surface a warning.
        Warn => "warn",
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_is_descending_severity() {
        let sev: Vec<u8> = RiskTier::PRIORITY.iter().map(|t| t.severity()).collect();
        assert_eq!(sev, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_tier_max() {
        assert_eq!(RiskTier::Safe.max(RiskTier::Dangerous), RiskTier::Dangerous);
        assert_eq!(RiskTier::Critical.max(RiskTier::Caution), RiskTier::Critical);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Approved.is_terminal());
        assert!(!RequestStatus::Executing.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::Timeout.is_terminal());
        assert!(RequestStatus::ExecutionFailed.is_terminal());
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_transitions() {
        let all = [
            RequestStatus::Pending,
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::Cancelled,
            RequestStatus::Timeout,
            RequestStatus::Executing,
            RequestStatus::Executed,
            RequestStatus::ExecutionFailed,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in &all {
                assert!(!from.can_transition_to(*to), "{from} -> {to}");
            }
        }
        assert!(RequestStatus::Approved.can_transition_to(RequestStatus::Pending));
        assert!(!RequestStatus::Pending.can_transition_to(RequestStatus::Executing));
    }

    #[test]
    fn test_string_forms_parse_back() {
        assert_eq!(
            "execution_failed".parse::<RequestStatus>().unwrap(),
            RequestStatus::ExecutionFailed
        );
        assert_eq!(
            "HUMAN_BREAKS_TIE".parse::<ConflictResolution>().unwrap(),
            ConflictResolution::HumanBreaksTie
        );
        assert!("maybe".parse::<Decision>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&TimeoutAction::AutoApproveWarn).unwrap();
        assert_eq!(json, "\"auto_approve_warn\"");
    }
}
