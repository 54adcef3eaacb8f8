//! Review submission and quorum resolution.
//!
//! # Review flow
//!
//! 1. Authenticate the reviewer's session key (constant-time)
//! 2. Load the request; refuse terminal or executing requests
//! 3. Refuse self-review (unless the agent is a trusted self-approver and
//!    the trust delay has passed)
//! 4. Refuse a second vote from the same reviewer in the current round
//! 5. Sign and persist the review
//! 6. Tally eligible votes, apply dynamic quorum and the conflict policy
//! 7. Compare-and-swap the request status if the tally decides it
//!
//! Everything happens inside the caller's write transaction, so two reviewers
//! racing each other (or the escalator) serialize on the ledger lock and only
//! one of them observes itself causing the transition.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use slb_audit::{AuditAction, AuditLog};
use slb_config::{Config, PatternTier};
use slb_core::{
    ConflictResolution, Decision, Request, RequestId, RequestStatus, Review, ReviewId, Session,
    SessionId, Timestamp,
};
use slb_storage::LedgerTx;

use crate::error::{ApprovalError, ApprovalResult};
use crate::session::SessionAuthenticator;

/// A reviewer's vote, as presented.
#[derive(Debug, Clone)]
pub struct SubmitReview {
    /// Reviewer session.
    pub session_id: SessionId,
    /// Reviewer session key, hex.
    pub session_key: String,
    /// Request being reviewed.
    pub request_id: RequestId,
    /// The vote.
    pub decision: Decision,
    /// Comments (for rejections, the reason first).
    pub comments: String,
}

/// Outcome of [`QuorumEngine::submit`].
#[derive(Debug, Clone, Serialize)]
pub struct ReviewResult {
    /// The stored review.
    pub review: Review,
    /// Eligible approvals in the current round.
    pub approvals: u32,
    /// Eligible rejections in the current round.
    pub rejections: u32,
    /// Whether this review moved the request to a new status.
    pub request_status_changed: bool,
    /// Status after the review.
    pub new_request_status: RequestStatus,
    /// Whether this review counts toward quorum right now.
    pub counted: bool,
    /// Approvals needed after dynamic quorum.
    pub effective_min_approvals: u32,
    /// The request is held on a tie until a human votes.
    pub awaiting_tie_break: bool,
}

/// What the tally says about a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumOutcome {
    /// Enough approvals.
    Approved,
    /// Blocked by rejections.
    Rejected,
    /// Tied under `human_breaks_tie`; waiting for a human reviewer.
    AwaitingTieBreak,
    /// Keep collecting votes.
    Undecided,
}

/// Inputs to [`decide`].
#[derive(Debug, Clone, Copy)]
pub struct QuorumInput<'a> {
    /// Conflict policy snapshot from the request.
    pub policy: ConflictResolution,
    /// The request's configured approval count.
    pub min_approvals: u32,
    /// Approvals needed after dynamic quorum.
    pub effective_approvals: u32,
    /// Eligible votes in submission order.
    pub votes: &'a [Decision],
    /// Whether the request was already held on a tie.
    pub awaiting_tie_break: bool,
    /// The vote just cast, when it came from an eligible human reviewer.
    pub human_vote: Option<Decision>,
}

/// Resolve a tally under the request's conflict policy.
#[must_use]
pub fn decide(input: &QuorumInput<'_>) -> QuorumOutcome {
    let approve_needed = input.effective_approvals.max(1);
    let reject_needed = input.min_approvals.max(1);
    let (approvals, rejections) = count(input.votes);

    match input.policy {
        ConflictResolution::AnyRejectionBlocks => {
            if rejections > 0 {
                QuorumOutcome::Rejected
            } else if approvals >= approve_needed {
                QuorumOutcome::Approved
            } else {
                QuorumOutcome::Undecided
            }
        },
        ConflictResolution::FirstWins => {
            let (mut a, mut r) = (0u32, 0u32);
            for vote in input.votes {
                match vote {
                    Decision::Approve => a = a.saturating_add(1),
                    Decision::Reject => r = r.saturating_add(1),
                }
                if a >= approve_needed {
                    return QuorumOutcome::Approved;
                }
                if r >= reject_needed {
                    return QuorumOutcome::Rejected;
                }
            }
            QuorumOutcome::Undecided
        },
        ConflictResolution::HumanBreaksTie => {
            let tied = approvals == rejections && approvals >= 1;
            if input.awaiting_tie_break || tied {
                return match input.human_vote {
                    Some(Decision::Approve) => QuorumOutcome::Approved,
                    Some(Decision::Reject) => QuorumOutcome::Rejected,
                    None => QuorumOutcome::AwaitingTieBreak,
                };
            }
            if approvals >= approve_needed && approvals > rejections {
                QuorumOutcome::Approved
            } else if rejections >= reject_needed && rejections > approvals {
                QuorumOutcome::Rejected
            } else {
                QuorumOutcome::Undecided
            }
        },
    }
}

/// Approvals needed once dynamic quorum is taken into account.
///
/// When the tier enables it, the request has been pending for at least
/// `fraction` of its review window, and fewer than `min_approvals` distinct
/// reviewers have voted, the requirement drops to
/// `max(floor, approvals, 1)`, never above `min_approvals`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn effective_min_approvals(
    request: &Request,
    tier: &PatternTier,
    fraction: f64,
    approvals: u32,
    distinct_reviewers: u32,
    now: Timestamp,
) -> u32 {
    let min = request.min_approvals;
    if !tier.dynamic_quorum || min == 0 || distinct_reviewers >= min {
        return min;
    }
    let window = request.created_at.secs_until(request.request_deadline) as f64;
    let elapsed = request.created_at.secs_until(now) as f64;
    if elapsed < window * fraction {
        return min;
    }
    tier.dynamic_quorum_floor.max(approvals).max(1).min(min)
}

fn count(votes: &[Decision]) -> (u32, u32) {
    votes.iter().fold((0u32, 0u32), |(a, r), vote| match vote {
        Decision::Approve => (a.saturating_add(1), r),
        Decision::Reject => (a, r.saturating_add(1)),
    })
}

/// Eligible votes on a request in its current round.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tally {
    pub(crate) votes: Vec<Decision>,
    pub(crate) approvals: u32,
    pub(crate) rejections: u32,
    pub(crate) distinct_reviewers: u32,
    pub(crate) counted: Vec<ReviewId>,
}

/// Applies reviews to requests.
#[derive(Debug, Clone)]
pub struct QuorumEngine {
    config: Arc<Config>,
    sessions: SessionAuthenticator,
}

impl QuorumEngine {
    /// Engine over a loaded configuration.
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            sessions: SessionAuthenticator::new(Arc::clone(&config)),
            config,
        }
    }

    /// Record a review and resolve the request if the tally decides it.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::Authentication`] for a wrong key or ended session
    /// - [`ApprovalError::NotFound`] for an unknown session or request
    /// - [`ApprovalError::Conflict`] when the request is executing or
    ///   terminal, or the reviewer already voted this round
    /// - [`ApprovalError::Authorization`] for self-review or a reviewer from
    ///   another project
    pub fn submit(
        &self,
        tx: &LedgerTx<'_>,
        opts: SubmitReview,
        now: Timestamp,
    ) -> ApprovalResult<ReviewResult> {
        let (reviewer, key) = self
            .sessions
            .authenticate(tx, &opts.session_id, &opts.session_key)?;
        let request = tx
            .get_request(&opts.request_id)?
            .ok_or_else(|| ApprovalError::request_not_found(opts.request_id))?;

        if !matches!(request.status, RequestStatus::Pending | RequestStatus::Approved) {
            return Err(ApprovalError::Conflict(format!(
                "request {} is {} and no longer accepts reviews",
                request.id, request.status
            )));
        }

        let self_approval = reviewer.id == request.requester_session_id;
        if self_approval {
            self.check_self_approval(&reviewer, &request, opts.decision, now)?;
        }
        if !self.config.general.cross_project_reviews && reviewer.project_path != request.project_path {
            return Err(ApprovalError::Authorization(format!(
                "reviewer session belongs to {} but the request belongs to {} \
                 (cross-project reviews are disabled)",
                reviewer.project_path.display(),
                request.project_path.display()
            )));
        }
        if tx.has_reviewed(&request.id, &reviewer.id, request.reviews_reset_at)? {
            return Err(ApprovalError::Conflict(format!(
                "session {} already reviewed request {}",
                reviewer.id, request.id
            )));
        }

        let review = Review {
            id: ReviewId::new(),
            request_id: request.id,
            reviewer_session_id: reviewer.id,
            reviewer_agent: reviewer.agent_name.clone(),
            reviewer_model: reviewer.model.clone(),
            decision: opts.decision,
            comments: opts.comments,
            signature: key
                .sign(&Review::signing_payload(&request.id, opts.decision, &now))
                .to_hex(),
            created_at: now,
        };
        tx.insert_review(&review)?;

        let tally = self.tally(tx, &request, now)?;
        let counted = tally.counted.contains(&review.id);
        let tier = self.config.patterns.tier(request.risk_tier);
        let effective = effective_min_approvals(
            &request,
            tier,
            self.config.general.dynamic_quorum_fraction,
            tally.approvals,
            tally.distinct_reviewers,
            now,
        );

        let audit = AuditLog::new(tx);
        audit.append(
            Some(request.id),
            Some(reviewer.id),
            AuditAction::ReviewSubmitted {
                decision: review.decision,
                counted,
                approvals: tally.approvals,
                rejections: tally.rejections,
            },
            now,
        )?;
        info!(
            request_id = %request.id,
            session_id = %reviewer.id,
            decision = %review.decision,
            counted,
            approvals = tally.approvals,
            rejections = tally.rejections,
            "Review recorded"
        );

        let mut result = ReviewResult {
            review,
            approvals: tally.approvals,
            rejections: tally.rejections,
            request_status_changed: false,
            new_request_status: request.status,
            counted,
            effective_min_approvals: effective,
            awaiting_tie_break: request.awaiting_tie_break,
        };

        // An approved request keeps its approval; late votes are on record only.
        if request.status == RequestStatus::Approved {
            return Ok(result);
        }

        let outcome = if self_approval {
            QuorumOutcome::Approved
        } else {
            decide(&QuorumInput {
                policy: request.conflict_resolution,
                min_approvals: request.min_approvals,
                effective_approvals: effective,
                votes: &tally.votes,
                awaiting_tie_break: request.awaiting_tie_break,
                human_vote: (counted && reviewer.human).then_some(result.review.decision),
            })
        };
        let reason = if self_approval {
            "trusted self-approval".to_string()
        } else {
            format!(
                "{} approvals / {} rejections under {} (needs {effective})",
                tally.approvals, tally.rejections, request.conflict_resolution
            )
        };
        if let Some(status) = self.apply(tx, &request, outcome, &reason, Some(reviewer.id), now)? {
            result.request_status_changed = true;
            result.new_request_status = status;
            result.awaiting_tie_break = false;
        } else if outcome == QuorumOutcome::AwaitingTieBreak {
            result.awaiting_tie_break = true;
        }
        Ok(result)
    }

    /// Re-run the tally on a pending request without a new vote. Used by the
    /// escalator, since dynamic quorum can lower the bar as time passes.
    ///
    /// Returns the new status if the request was resolved.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn reevaluate(
        &self,
        tx: &LedgerTx<'_>,
        request: &Request,
        now: Timestamp,
    ) -> ApprovalResult<Option<RequestStatus>> {
        if request.status != RequestStatus::Pending {
            return Ok(None);
        }
        let tally = self.tally(tx, request, now)?;
        if tally.votes.is_empty() {
            return Ok(None);
        }
        let tier = self.config.patterns.tier(request.risk_tier);
        let effective = effective_min_approvals(
            request,
            tier,
            self.config.general.dynamic_quorum_fraction,
            tally.approvals,
            tally.distinct_reviewers,
            now,
        );
        let outcome = decide(&QuorumInput {
            policy: request.conflict_resolution,
            min_approvals: request.min_approvals,
            effective_approvals: effective,
            votes: &tally.votes,
            awaiting_tie_break: request.awaiting_tie_break,
            human_vote: None,
        });
        let reason = format!(
            "{} approvals / {} rejections re-evaluated (needs {effective})",
            tally.approvals, tally.rejections
        );
        self.apply(tx, request, outcome, &reason, None, now)
    }

    /// Eligible votes on `request` in its current review round.
    pub(crate) fn tally(
        &self,
        tx: &LedgerTx<'_>,
        request: &Request,
        now: Timestamp,
    ) -> ApprovalResult<Tally> {
        let same_model_after = request
            .created_at
            .plus_secs(self.config.general.different_model_timeout);
        let mut tally = Tally::default();
        let mut seen: Vec<SessionId> = Vec::new();

        for review in tx.reviews_for(&request.id)? {
            if request.reviews_reset_at.is_some_and(|reset| review.created_at < reset) {
                continue;
            }
            if review.reviewer_session_id == request.requester_session_id
                || seen.contains(&review.reviewer_session_id)
            {
                continue;
            }
            seen.push(review.reviewer_session_id);
            let same_model = request.require_different_model
                && review.reviewer_model.eq_ignore_ascii_case(&request.requester_model);
            if same_model && now < same_model_after {
                debug!(
                    request_id = %request.id,
                    reviewer = %review.reviewer_session_id,
                    "Same-model review held back"
                );
                continue;
            }
            match review.decision {
                Decision::Approve => tally.approvals = tally.approvals.saturating_add(1),
                Decision::Reject => tally.rejections = tally.rejections.saturating_add(1),
            }
            tally.votes.push(review.decision);
            tally.counted.push(review.id);
        }
        tally.distinct_reviewers = u32::try_from(seen.len()).unwrap_or(u32::MAX);
        Ok(tally)
    }

    fn check_self_approval(
        &self,
        reviewer: &Session,
        request: &Request,
        decision: Decision,
        now: Timestamp,
    ) -> ApprovalResult<()> {
        if decision != Decision::Approve || !self.config.is_trusted_self_approver(&reviewer.agent_name) {
            return Err(ApprovalError::Authorization(
                "cannot review your own request (self-review is not allowed)".into(),
            ));
        }
        let delay = self.config.agents.trusted_self_approve_delay_seconds;
        let allowed_at = request.created_at.plus_secs(delay);
        if now < allowed_at {
            return Err(ApprovalError::Authorization(format!(
                "trusted self-approval of your own request is allowed in {}s",
                now.secs_until(allowed_at)
            )));
        }
        Ok(())
    }

    /// Compare-and-swap the outcome onto the request. Returns the new status
    /// when one was written.
    fn apply(
        &self,
        tx: &LedgerTx<'_>,
        request: &Request,
        outcome: QuorumOutcome,
        reason: &str,
        actor: Option<SessionId>,
        now: Timestamp,
    ) -> ApprovalResult<Option<RequestStatus>> {
        let to = match outcome {
            QuorumOutcome::Approved => {
                let ttl = now.plus_secs(self.config.approval_ttl_secs(request.risk_tier));
                if !tx.approve_request(&request.id, ttl)? {
                    return Err(lost_race(request));
                }
                RequestStatus::Approved
            },
            QuorumOutcome::Rejected => {
                if !tx.transition_status(&request.id, RequestStatus::Pending, RequestStatus::Rejected, now)? {
                    return Err(lost_race(request));
                }
                RequestStatus::Rejected
            },
            QuorumOutcome::AwaitingTieBreak => {
                if !request.awaiting_tie_break {
                    tx.set_awaiting_tie_break(&request.id, true)?;
                    info!(request_id = %request.id, "Votes tied; waiting for a human reviewer");
                }
                return Ok(None);
            },
            QuorumOutcome::Undecided => return Ok(None),
        };

        AuditLog::new(tx).append(
            Some(request.id),
            actor,
            AuditAction::StatusChanged {
                from: RequestStatus::Pending,
                to,
                reason: reason.to_string(),
            },
            now,
        )?;
        info!(request_id = %request.id, status = %to, reason, "Request resolved");
        Ok(Some(to))
    }
}

fn lost_race(request: &Request) -> ApprovalError {
    ApprovalError::Conflict(format!(
        "request {} changed state concurrently; re-check its status",
        request.id
    ))
}
