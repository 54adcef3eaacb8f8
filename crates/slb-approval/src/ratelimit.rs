//! Per-session request admission.
//!
//! Admission runs inside the same ledger write transaction that inserts the
//! request, so counting and recording are one atomic step: two concurrent
//! `run` invocations for the same session serialize on the ledger's write
//! lock and the second one sees the first one's admission.

use serde::Serialize;
use tracing::warn;

use slb_config::RateLimitsConfig;
use slb_core::{RateLimitAction, SessionId, Timestamp};
use slb_storage::LedgerTx;

use crate::error::{ApprovalResult, RateLimitError};

/// Length of the sliding per-minute window.
const WINDOW_SECS: u64 = 60;

/// Outcome of a successful admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Admission {
    /// Within limits.
    Admitted,
    /// Over a limit, but the configured action is `warn`.
    Warned {
        /// The breach that was tolerated.
        breach: RateLimitError,
    },
}

impl Admission {
    /// The tolerated breach, if any.
    #[must_use]
    pub fn warning(&self) -> Option<&RateLimitError> {
        match self {
            Self::Admitted => None,
            Self::Warned { breach } => Some(breach),
        }
    }
}

/// Bounds request creation per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    max_pending: u32,
    max_per_minute: u32,
    action: RateLimitAction,
}

impl RateLimiter {
    /// Limiter with explicit caps. Zero disables a cap.
    #[must_use]
    pub fn new(max_pending: u32, max_per_minute: u32, action: RateLimitAction) -> Self {
        Self {
            max_pending,
            max_per_minute,
            action,
        }
    }

    /// Limiter from the `rate_limits` section.
    #[must_use]
    pub fn from_config(cfg: &RateLimitsConfig) -> Self {
        Self::new(
            cfg.max_pending_per_session,
            cfg.max_requests_per_minute,
            cfg.rate_limit_action,
        )
    }

    /// Configured breach action.
    #[must_use]
    pub fn action(&self) -> RateLimitAction {
        self.action
    }

    /// Current usage for `session`, without admitting anything.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the counts cannot be read.
    pub fn usage(
        &self,
        tx: &LedgerTx<'_>,
        session: &SessionId,
        now: Timestamp,
    ) -> ApprovalResult<RateLimitError> {
        let pending = if self.max_pending > 0 {
            tx.pending_count_for_session(session)?
        } else {
            0
        };
        let mut window_start = now.minus_secs(WINDOW_SECS);
        if let Some(reset) = tx.last_rate_limit_reset(session)? {
            window_start = window_start.max(reset);
        }
        let (recent, reset_at) = if self.max_per_minute > 0 {
            let recent = tx.admissions_since(session, window_start)?;
            let reset_at = if recent >= self.max_per_minute {
                tx.oldest_admission_since(session, window_start)?
                    .map(|oldest| oldest.plus_secs(WINDOW_SECS))
            } else {
                None
            };
            (recent, reset_at)
        } else {
            (0, None)
        };
        Ok(RateLimitError {
            session_id: *session,
            pending,
            max_pending: self.max_pending,
            recent,
            max_per_minute: self.max_per_minute,
            reset_at,
            action: self.action,
        })
    }

    /// Check the limits for `session` and, if admitted, record the admission.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ApprovalError::RateLimited`] when a limit is hit and
    /// the action is `reject` or `queue`, or a storage error.
    pub fn admit(
        &self,
        tx: &LedgerTx<'_>,
        session: &SessionId,
        now: Timestamp,
    ) -> ApprovalResult<Admission> {
        let usage = self.usage(tx, session, now)?;
        let breached = usage.pending_exceeded() || usage.minute_exceeded();

        if breached {
            warn!(
                session_id = %session,
                action = %self.action,
                pending = usage.pending,
                recent = usage.recent,
                "Rate limit exceeded"
            );
            match self.action {
                RateLimitAction::Reject | RateLimitAction::Queue => return Err(usage.into()),
                RateLimitAction::Warn => {},
            }
        }

        tx.record_admission(session, now)?;
        Ok(if breached {
            Admission::Warned { breach: usage }
        } else {
            Admission::Admitted
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApprovalError;
    use slb_storage::Ledger;

    fn ledger() -> Ledger {
        Ledger::open_in_memory().unwrap()
    }

    fn admit_n(
        ledger: &Ledger,
        limiter: RateLimiter,
        session: &SessionId,
        now: Timestamp,
        n: u32,
    ) -> Vec<ApprovalResult<Admission>> {
        (0..n)
            .map(|_| ledger.write(|tx| limiter.admit(tx, session, now)))
            .collect()
    }

    #[test]
    fn test_nth_admitted_and_next_denied() {
        let ledger = ledger();
        let limiter = RateLimiter::new(0, 3, RateLimitAction::Reject);
        let s = SessionId::new();
        let now = Timestamp::now();

        let results = admit_n(&ledger, limiter, &s, now, 4);
        assert!(results[..3].iter().all(|r| matches!(r, Ok(Admission::Admitted))));
        let Err(ApprovalError::RateLimited(err)) = &results[3] else {
            panic!("expected rate limit, got {:?}", results[3]);
        };
        assert!(err.minute_exceeded());
        assert_eq!(err.recent, 3);
        assert_eq!(err.reset_at, Some(now.plus_secs(60)));
        assert_eq!(err.action, RateLimitAction::Reject);
    }

    #[test]
    fn test_window_slides() {
        let ledger = ledger();
        let limiter = RateLimiter::new(0, 1, RateLimitAction::Reject);
        let s = SessionId::new();
        let start = Timestamp::now();

        assert!(ledger.write(|tx| limiter.admit(tx, &s, start)).is_ok());
        assert!(ledger.write(|tx| limiter.admit(tx, &s, start.plus_secs(30))).is_err());
        assert!(ledger.write(|tx| limiter.admit(tx, &s, start.plus_secs(61))).is_ok());
    }

    #[test]
    fn test_warn_admits_and_reports() {
        let ledger = ledger();
        let limiter = RateLimiter::new(0, 1, RateLimitAction::Warn);
        let s = SessionId::new();
        let now = Timestamp::now();

        let results = admit_n(&ledger, limiter, &s, now, 2);
        assert!(matches!(results[0], Ok(Admission::Admitted)));
        let second = results[1].as_ref().unwrap();
        assert!(second.warning().is_some());
        let recent = ledger.read(|tx| tx.admissions_since(&s, now.minus_secs(60))).unwrap();
        assert_eq!(recent, 2);
    }

    #[test]
    fn test_queue_is_denied_with_action() {
        let ledger = ledger();
        let limiter = RateLimiter::new(0, 1, RateLimitAction::Queue);
        let s = SessionId::new();
        let now = Timestamp::now();

        let results = admit_n(&ledger, limiter, &s, now, 2);
        let Err(ApprovalError::RateLimited(err)) = &results[1] else {
            panic!("expected rate limit");
        };
        assert_eq!(err.action, RateLimitAction::Queue);
    }

    #[test]
    fn test_reset_restarts_window() {
        let ledger = ledger();
        let limiter = RateLimiter::new(0, 1, RateLimitAction::Reject);
        let s = SessionId::new();
        let now = Timestamp::now();

        assert!(ledger.write(|tx| limiter.admit(tx, &s, now)).is_ok());
        ledger
            .write(|tx| tx.reset_rate_limits(&s, now.plus_secs(1)))
            .unwrap();
        assert!(ledger.write(|tx| limiter.admit(tx, &s, now.plus_secs(2))).is_ok());
    }

    #[test]
    fn test_zero_caps_disable_limits() {
        let ledger = ledger();
        let limiter = RateLimiter::new(0, 0, RateLimitAction::Reject);
        let s = SessionId::new();
        let results = admit_n(&ledger, limiter, &s, Timestamp::now(), 25);
        assert!(results.iter().all(|r| matches!(r, Ok(Admission::Admitted))));
    }

    #[test]
    fn test_denied_admission_is_not_recorded() {
        let ledger = ledger();
        let limiter = RateLimiter::new(0, 1, RateLimitAction::Reject);
        let s = SessionId::new();
        let now = Timestamp::now();
        let _ = admit_n(&ledger, limiter, &s, now, 3);
        let recent = ledger.read(|tx| tx.admissions_since(&s, now.minus_secs(60))).unwrap();
        assert_eq!(recent, 1);
    }
}
