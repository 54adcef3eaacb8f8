//! Request timeouts and approval expiry.
//!
//! Two clocks run per request. The request deadline bounds how long a
//! request may wait for a decision; when it passes, the configured
//! [`TimeoutAction`] runs. The approval TTL bounds how long an approval stays
//! usable; when it passes before execution starts, the request goes back to
//! `Pending` and a fresh review round begins.
//!
//! Nothing here owns a timer. [`TtlEscalator::sweep`] is driven by
//! `slb escalate` (once or on an interval) and [`TtlEscalator::settle`] by the
//! requester's own wait loop, so deadlines are enforced by whichever process
//! looks first.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use slb_audit::{AuditAction, AuditLog};
use slb_config::Config;
use slb_core::{Request, RequestId, RequestStatus, TimeoutAction, Timestamp};
use slb_storage::{LedgerTx, RequestFilter};

use crate::error::{ApprovalError, ApprovalResult};
use crate::quorum::QuorumEngine;

/// One thing the escalator did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationEvent {
    /// Deadline passed under `escalate`; extended once.
    Escalated {
        /// Request.
        request_id: RequestId,
        /// New deadline.
        deadline: Timestamp,
    },
    /// Deadline passed and the timeout action resolved the request.
    TimedOut {
        /// Request.
        request_id: RequestId,
        /// Action applied.
        action: TimeoutAction,
        /// Resulting status.
        status: RequestStatus,
    },
    /// An approval lapsed unused; the request is pending again.
    ApprovalExpired {
        /// Request.
        request_id: RequestId,
        /// Deadline of the new review round.
        deadline: Timestamp,
    },
    /// A zero-quorum request outlived its tier's soft window unopposed.
    AutoApproved {
        /// Request.
        request_id: RequestId,
    },
    /// Re-tallying (dynamic quorum) resolved the request.
    Resolved {
        /// Request.
        request_id: RequestId,
        /// Resulting status.
        status: RequestStatus,
    },
}

impl EscalationEvent {
    /// The request the event is about.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Escalated { request_id, .. }
            | Self::TimedOut { request_id, .. }
            | Self::ApprovalExpired { request_id, .. }
            | Self::AutoApproved { request_id }
            | Self::Resolved { request_id, .. } => *request_id,
        }
    }

    /// Status transition the event caused, if any.
    #[must_use]
    pub fn transition(&self) -> Option<(RequestStatus, RequestStatus)> {
        match self {
            Self::Escalated { .. } => None,
            Self::TimedOut { status, .. } | Self::Resolved { status, .. } => {
                Some((RequestStatus::Pending, *status))
            },
            Self::ApprovalExpired { .. } => Some((RequestStatus::Approved, RequestStatus::Pending)),
            Self::AutoApproved { .. } => Some((RequestStatus::Pending, RequestStatus::Approved)),
        }
    }
}

/// Everything one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EscalationReport {
    /// Requests examined.
    pub examined: usize,
    /// Actions taken, in order.
    pub events: Vec<EscalationEvent>,
}

/// Applies request timeouts and approval expiry.
#[derive(Debug, Clone)]
pub struct TtlEscalator {
    config: Arc<Config>,
    quorum: QuorumEngine,
}

impl TtlEscalator {
    /// Escalator over a loaded configuration.
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            quorum: QuorumEngine::new(Arc::clone(&config)),
            config,
        }
    }

    /// Examine every pending and approved request in the ledger.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn sweep(&self, tx: &LedgerTx<'_>, now: Timestamp) -> ApprovalResult<EscalationReport> {
        let mut report = EscalationReport::default();

        for request in tx.approvals_past_ttl(now)? {
            report.examined = report.examined.saturating_add(1);
            report.events.extend(self.expire_approval(tx, &request, now)?);
        }

        let pending = tx.list_requests(&RequestFilter {
            status: Some(RequestStatus::Pending),
            ..RequestFilter::default()
        })?;
        for request in pending {
            report.examined = report.examined.saturating_add(1);
            report.events.extend(self.settle_pending(tx, &request, now)?);
        }

        if !report.events.is_empty() {
            info!(examined = report.examined, actions = report.events.len(), "Escalation sweep");
        }
        Ok(report)
    }

    /// Apply whatever is due to one request.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::NotFound`] for an unknown request, or a storage error.
    pub fn settle(
        &self,
        tx: &LedgerTx<'_>,
        id: &RequestId,
        now: Timestamp,
    ) -> ApprovalResult<Option<EscalationEvent>> {
        let request = tx
            .get_request(id)?
            .ok_or_else(|| ApprovalError::request_not_found(id))?;
        match request.status {
            RequestStatus::Approved => self.expire_approval(tx, &request, now),
            RequestStatus::Pending => self.settle_pending(tx, &request, now),
            _ => Ok(None),
        }
    }

    fn expire_approval(
        &self,
        tx: &LedgerTx<'_>,
        request: &Request,
        now: Timestamp,
    ) -> ApprovalResult<Option<EscalationEvent>> {
        let lapsed = request.approval_ttl_deadline.is_some_and(|ttl| ttl <= now);
        if !lapsed {
            return Ok(None);
        }
        let deadline = now.plus_secs(self.config.general.request_timeout);
        if !tx.revert_expired_approval(&request.id, now, deadline)? {
            return Ok(None);
        }
        let audit = AuditLog::new(tx);
        audit.append(Some(request.id), None, AuditAction::ApprovalExpired, now)?;
        audit.append(
            Some(request.id),
            None,
            AuditAction::StatusChanged {
                from: RequestStatus::Approved,
                to: RequestStatus::Pending,
                reason: "approval expired before execution".into(),
            },
            now,
        )?;
        info!(request_id = %request.id, "Approval expired; request needs fresh review");
        Ok(Some(EscalationEvent::ApprovalExpired {
            request_id: request.id,
            deadline,
        }))
    }

    fn settle_pending(
        &self,
        tx: &LedgerTx<'_>,
        request: &Request,
        now: Timestamp,
    ) -> ApprovalResult<Option<EscalationEvent>> {
        if let Some(status) = self.quorum.reevaluate(tx, request, now)? {
            return Ok(Some(EscalationEvent::Resolved {
                request_id: request.id,
                status,
            }));
        }
        if let Some(event) = self.auto_approve(tx, request, now)? {
            return Ok(Some(event));
        }
        if now < request.request_deadline {
            return Ok(None);
        }
        self.apply_timeout(tx, request, now)
    }

    /// Zero-quorum requests pass once the tier's soft window elapses with no
    /// rejection on record.
    fn auto_approve(
        &self,
        tx: &LedgerTx<'_>,
        request: &Request,
        now: Timestamp,
    ) -> ApprovalResult<Option<EscalationEvent>> {
        if request.min_approvals > 0 {
            return Ok(None);
        }
        let delay = self
            .config
            .patterns
            .tier(request.risk_tier)
            .auto_approve_delay_seconds;
        if now < request.created_at.plus_secs(delay) {
            return Ok(None);
        }
        if self.quorum.tally(tx, request, now)?.rejections > 0 {
            return Ok(None);
        }
        let ttl = now.plus_secs(self.config.approval_ttl_secs(request.risk_tier));
        if !tx.approve_request(&request.id, ttl)? {
            return Ok(None);
        }
        AuditLog::new(tx).append(
            Some(request.id),
            None,
            AuditAction::StatusChanged {
                from: RequestStatus::Pending,
                to: RequestStatus::Approved,
                reason: format!("no objection within the {delay}s approval window"),
            },
            now,
        )?;
        info!(request_id = %request.id, delay_secs = delay, "Request auto-approved");
        Ok(Some(EscalationEvent::AutoApproved {
            request_id: request.id,
        }))
    }

    fn apply_timeout(
        &self,
        tx: &LedgerTx<'_>,
        request: &Request,
        now: Timestamp,
    ) -> ApprovalResult<Option<EscalationEvent>> {
        let action = self.config.general.timeout_action;
        let audit = AuditLog::new(tx);

        let status = match action {
            TimeoutAction::Escalate if !request.escalated => {
                let deadline = now.plus_secs(self.config.general.request_timeout);
                if !tx.extend_deadline(&request.id, deadline)? {
                    return Ok(None);
                }
                audit.append(Some(request.id), None, AuditAction::DeadlineExtended { deadline }, now)?;
                warn!(request_id = %request.id, %deadline, "Request deadline passed; escalated");
                return Ok(Some(EscalationEvent::Escalated {
                    request_id: request.id,
                    deadline,
                }));
            },
            TimeoutAction::Escalate => {
                if !tx.transition_status(&request.id, RequestStatus::Pending, RequestStatus::Timeout, now)? {
                    return Ok(None);
                }
                RequestStatus::Timeout
            },
            TimeoutAction::AutoReject => {
                if !tx.transition_status(&request.id, RequestStatus::Pending, RequestStatus::Rejected, now)? {
                    return Ok(None);
                }
                RequestStatus::Rejected
            },
            TimeoutAction::AutoApproveWarn => {
                let ttl = now.plus_secs(self.config.approval_ttl_secs(request.risk_tier));
                if !tx.approve_request(&request.id, ttl)? {
                    return Ok(None);
                }
                warn!(
                    request_id = %request.id,
                    tier = %request.risk_tier,
                    "Request approved on timeout without quorum"
                );
                RequestStatus::Approved
            },
        };

        audit.append(
            Some(request.id),
            None,
            AuditAction::StatusChanged {
                from: RequestStatus::Pending,
                to: status,
                reason: "timeout".into(),
            },
            now,
        )?;
        audit.append(
            Some(request.id),
            None,
            AuditAction::TimeoutApplied {
                action,
                new_status: status,
                skipped_approval: false,
                approved_on_timeout: status == RequestStatus::Approved,
            },
            now,
        )?;
        info!(request_id = %request.id, %action, status = %status, "Timeout applied");
        Ok(Some(EscalationEvent::TimedOut {
            request_id: request.id,
            action,
            status,
        }))
    }
}
