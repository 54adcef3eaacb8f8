//! Opening requests.
//!
//! Creation is one ledger write: the session check, rate-limit admission,
//! classification and the insert (or the skip record for safe commands) all
//! commit together or not at all.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use slb_audit::{AuditAction, AuditLog};
use slb_config::Config;
use slb_core::{Justification, Request, RequestId, RequestStatus, RiskTier, SessionId, Timestamp};
use slb_storage::LedgerTx;

use crate::classify::{Classification, RiskClassifier};
use crate::dryrun::dry_run_command;
use crate::error::{ApprovalError, ApprovalResult, RateLimitError};
use crate::ratelimit::{Admission, RateLimiter};
use crate::redact::redact;
use crate::session::SessionAuthenticator;

/// Options for opening a request.
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    /// Requesting session.
    pub session_id: SessionId,
    /// The command line.
    pub command: String,
    /// Working directory for execution.
    pub cwd: PathBuf,
    /// Run through `$SHELL -c`.
    pub shell: bool,
    /// Why the command is needed.
    pub justification: Justification,
    /// Project the request belongs to; defaults to the session's project.
    pub project_path: Option<PathBuf>,
    /// Raise the tier's approval count for this request.
    pub min_approvals: Option<u32>,
    /// Override the request timeout, in seconds.
    pub timeout_secs: Option<u64>,
}

/// Outcome of [`RequestCreator::create`].
#[derive(Debug, Clone, Serialize)]
pub struct CreateResult {
    /// Safe command: nothing was persisted, run it straight away.
    pub skipped: bool,
    /// The persisted request, when not skipped.
    pub request: Option<Request>,
    /// How the command was classified.
    pub classification: Classification,
    /// Soft window the tier asks for before an unreviewed run.
    pub auto_approve_delay_secs: u64,
    /// A breach tolerated under the `warn` action.
    pub rate_limit_warning: Option<RateLimitError>,
    /// Redacted command.
    pub display_command: String,
    /// Non-destructive preview, when enabled and supported.
    pub dry_run_command: Option<String>,
}

impl CreateResult {
    /// Identifier of the persisted request.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        self.request.as_ref().map(|r| r.id)
    }
}

/// Classifies, rate-limits and opens requests.
#[derive(Debug, Clone)]
pub struct RequestCreator {
    config: Arc<Config>,
    classifier: RiskClassifier,
    limiter: RateLimiter,
    sessions: SessionAuthenticator,
}

impl RequestCreator {
    /// Creator over a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Config`] if a pattern does not compile.
    pub fn new(config: Arc<Config>) -> ApprovalResult<Self> {
        Ok(Self {
            classifier: RiskClassifier::from_config(&config)?,
            limiter: RateLimiter::from_config(&config.rate_limits),
            sessions: SessionAuthenticator::new(Arc::clone(&config)),
            config,
        })
    }

    /// The classifier in use.
    #[must_use]
    pub fn classifier(&self) -> &RiskClassifier {
        &self.classifier
    }

    /// Open a request for `opts.command`.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::Validation`] for an empty command, a zero timeout,
    ///   or an approval override below the tier's minimum
    /// - [`ApprovalError::NotFound`] / [`ApprovalError::Authentication`] for
    ///   an unknown or ended session
    /// - [`ApprovalError::Authorization`] for a blocked agent
    /// - [`ApprovalError::RateLimited`] when the limiter refuses
    pub fn create(
        &self,
        tx: &LedgerTx<'_>,
        opts: CreateRequest,
        now: Timestamp,
    ) -> ApprovalResult<CreateResult> {
        let command = opts.command.trim().to_string();
        if command.is_empty() {
            return Err(ApprovalError::Validation("command is required".into()));
        }
        if opts.timeout_secs == Some(0) {
            return Err(ApprovalError::Validation("timeout must be greater than zero".into()));
        }

        let session = self.sessions.active_session(tx, &opts.session_id)?;
        if self.config.is_blocked(&session.agent_name) {
            return Err(ApprovalError::Authorization(format!(
                "agent {} is blocked from creating requests",
                session.agent_name
            )));
        }

        let admission = self.limiter.admit(tx, &session.id, now)?;
        let audit = AuditLog::new(tx);
        let rate_limit_warning = admission.warning().cloned();
        if let Admission::Warned { breach } = &admission {
            audit.append(
                None,
                Some(session.id),
                AuditAction::RateLimited {
                    action: breach.action,
                    message: breach.to_string(),
                    admitted: true,
                },
                now,
            )?;
        }

        let classification = self.classifier.classify(&command);
        let tier = classification.tier;
        let tier_cfg = self.config.patterns.tier(tier);
        let display_command = redact(&command);
        let dry_run = if self.config.general.enable_dry_run {
            dry_run_command(&command)
        } else {
            None
        };

        if tier == RiskTier::Safe {
            audit.append(
                None,
                Some(session.id),
                AuditAction::RequestSkipped {
                    command: display_command.clone(),
                    tier,
                    auto_approve_delay_secs: tier_cfg.auto_approve_delay_seconds,
                },
                now,
            )?;
            info!(session_id = %session.id, command = %display_command, "Safe command skipped review");
            return Ok(CreateResult {
                skipped: true,
                request: None,
                auto_approve_delay_secs: tier_cfg.auto_approve_delay_seconds,
                classification,
                rate_limit_warning,
                display_command,
                dry_run_command: dry_run,
            });
        }

        let min_approvals = match opts.min_approvals {
            Some(n) if n < tier_cfg.min_approvals => {
                return Err(ApprovalError::Validation(format!(
                    "min approvals {n} is below the {tier} tier minimum of {}",
                    tier_cfg.min_approvals
                )));
            },
            Some(n) => n,
            None => tier_cfg.min_approvals,
        };
        let timeout = opts.timeout_secs.unwrap_or(self.config.general.request_timeout);

        let request = Request {
            id: RequestId::new(),
            command,
            display_command: display_command.clone(),
            cwd: opts.cwd,
            shell: opts.shell,
            risk_tier: tier,
            min_approvals,
            require_different_model: tier == RiskTier::Critical
                || self.config.general.require_different_model,
            conflict_resolution: self.config.general.conflict_resolution,
            status: RequestStatus::Pending,
            requester_session_id: session.id,
            requester_agent: session.agent_name.clone(),
            requester_model: session.model.clone(),
            justification: opts.justification,
            project_path: opts.project_path.unwrap_or_else(|| session.project_path.clone()),
            dry_run_command: dry_run.clone(),
            created_at: now,
            request_deadline: now.plus_secs(timeout),
            approval_ttl_deadline: None,
            escalated: false,
            awaiting_tie_break: false,
            reviews_reset_at: None,
            resolved_at: None,
            execution: None,
        };
        tx.insert_request(&request)?;
        audit.append(
            Some(request.id),
            Some(session.id),
            AuditAction::RequestCreated {
                command: display_command.clone(),
                tier,
                min_approvals,
                require_different_model: request.require_different_model,
            },
            now,
        )?;

        info!(
            request_id = %request.id,
            session_id = %session.id,
            tier = %tier,
            min_approvals,
            command = %display_command,
            "Request created"
        );
        Ok(CreateResult {
            skipped: false,
            request: Some(request),
            auto_approve_delay_secs: tier_cfg.auto_approve_delay_seconds,
            classification,
            rate_limit_warning,
            display_command,
            dry_run_command: dry_run,
        })
    }
}

/// Record a refused admission. Runs in its own write, after the refused
/// creation rolled back.
///
/// # Errors
///
/// Returns a storage error if the entry cannot be appended.
pub fn audit_rate_limit_denial(
    tx: &LedgerTx<'_>,
    denial: &RateLimitError,
    now: Timestamp,
) -> ApprovalResult<()> {
    AuditLog::new(tx).append(
        None,
        Some(denial.session_id),
        AuditAction::RateLimited {
            action: denial.action,
            message: denial.to_string(),
            admitted: false,
        },
        now,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RegisterSession;
    use slb_core::RateLimitAction;
    use slb_storage::{Ledger, RequestFilter};

    struct Fixture {
        ledger: Ledger,
        creator: RequestCreator,
        session: SessionId,
    }

    fn fixture(config: Config) -> Fixture {
        let config = Arc::new(config);
        let ledger = Ledger::open_in_memory().unwrap();
        let auth = SessionAuthenticator::new(Arc::clone(&config));
        let reg = ledger
            .write(|tx| {
                auth.register(
                    tx,
                    RegisterSession {
                        agent_name: "BlueLake".into(),
                        program: "codex".into(),
                        model: "gpt".into(),
                        project_path: PathBuf::from("/work/app"),
                        human: false,
                    },
                    Timestamp::now(),
                )
            })
            .unwrap();
        Fixture {
            ledger,
            creator: RequestCreator::new(config).unwrap(),
            session: reg.session.id,
        }
    }

    fn opts(session: SessionId, command: &str) -> CreateRequest {
        CreateRequest {
            session_id: session,
            command: command.into(),
            cwd: PathBuf::from("/work/app"),
            ..CreateRequest::default()
        }
    }

    impl Fixture {
        fn create(&self, command: &str) -> ApprovalResult<CreateResult> {
            self.create_with(opts(self.session, command))
        }

        fn create_with(&self, o: CreateRequest) -> ApprovalResult<CreateResult> {
            self.ledger.write(|tx| self.creator.create(tx, o, Timestamp::now()))
        }

        fn stored(&self) -> Vec<Request> {
            self.ledger
                .read(|tx| tx.list_requests(&RequestFilter::default()))
                .unwrap()
        }
    }

    #[test]
    fn test_dangerous_command_is_pending() {
        let f = fixture(Config::builtin().unwrap());
        let result = f.create("rm -rf ./build").unwrap();
        assert!(!result.skipped);
        let req = result.request.unwrap();
        assert_eq!(req.status, RequestStatus::Pending);
        assert_eq!(req.risk_tier, RiskTier::Dangerous);
        assert_eq!(req.min_approvals, 1);
        assert_eq!(req.requester_agent, "BlueLake");
        assert_eq!(req.project_path, PathBuf::from("/work/app"));
        assert_eq!(req.dry_run_command.as_deref(), Some("ls -la -- ./build"));
        assert_eq!(req.created_at.secs_until(req.request_deadline), 1800);
        assert_eq!(f.stored().len(), 1);
    }

    #[test]
    fn test_safe_command_persists_nothing() {
        let f = fixture(Config::builtin().unwrap());
        let result = f.create("git stash").unwrap();
        assert!(result.skipped);
        assert!(result.request.is_none());
        assert!(f.stored().is_empty());
    }

    #[test]
    fn test_critical_forces_different_model() {
        let f = fixture(Config::builtin().unwrap());
        let req = f.create("rm -rf /etc").unwrap().request.unwrap();
        assert_eq!(req.risk_tier, RiskTier::Critical);
        assert!(req.require_different_model);
        assert_eq!(req.min_approvals, 2);
    }

    #[test]
    fn test_secret_is_redacted_for_display() {
        let f = fixture(Config::builtin().unwrap());
        let req = f
            .create("kubectl delete secret db --token=abc123")
            .unwrap()
            .request
            .unwrap();
        assert!(req.command.contains("abc123"));
        assert!(!req.display_command.contains("abc123"));
    }

    #[test]
    fn test_min_approvals_override_only_raises() {
        let f = fixture(Config::builtin().unwrap());
        let mut o = opts(f.session, "rm -rf ./build");
        o.min_approvals = Some(3);
        assert_eq!(f.create_with(o.clone()).unwrap().request.unwrap().min_approvals, 3);

        let mut critical = opts(f.session, "rm -rf /etc");
        critical.min_approvals = Some(1);
        let err = f.create_with(critical).unwrap_err();
        assert!(matches!(err, ApprovalError::Validation(_)));
    }

    #[test]
    fn test_blocked_agent_is_refused() {
        let mut config = Config::builtin().unwrap();
        config.agents.blocked.push("bluelake".into());
        let f = fixture(config);
        let err = f.create("rm -rf ./build").unwrap_err();
        assert_eq!(err.kind(), "authorization_error");
        assert!(f.stored().is_empty());
    }

    #[test]
    fn test_empty_command_is_validation_error() {
        let f = fixture(Config::builtin().unwrap());
        assert!(matches!(f.create("   "), Err(ApprovalError::Validation(_))));
    }

    #[test]
    fn test_unknown_session_is_not_found() {
        let f = fixture(Config::builtin().unwrap());
        let err = f.create_with(opts(SessionId::new(), "rm -rf ./build")).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_rate_limit_denial_persists_nothing() {
        let mut config = Config::builtin().unwrap();
        config.rate_limits.max_pending_per_session = 1;
        let f = fixture(config);
        f.create("rm -rf ./build").unwrap();
        let err = f.create("rm -rf ./dist").unwrap_err();
        let ApprovalError::RateLimited(denial) = err else {
            panic!("expected rate limit");
        };
        assert!(denial.pending_exceeded());
        assert_eq!(denial.action, RateLimitAction::Reject);
        assert_eq!(f.stored().len(), 1);

        f.ledger
            .write(|tx| audit_rate_limit_denial(tx, &denial, Timestamp::now()))
            .unwrap();
        let entries = f
            .ledger
            .read(|tx| AuditLog::new(tx).entries(None).map_err(ApprovalError::from))
            .unwrap();
        assert!(matches!(
            entries.last().unwrap().action,
            AuditAction::RateLimited { admitted: false, .. }
        ));
    }

    #[test]
    fn test_rate_limit_warn_admits_with_warning() {
        let mut config = Config::builtin().unwrap();
        config.rate_limits.max_requests_per_minute = 1;
        config.rate_limits.rate_limit_action = RateLimitAction::Warn;
        let f = fixture(config);
        assert!(f.create("rm -rf ./a").unwrap().rate_limit_warning.is_none());
        let second = f.create("rm -rf ./b").unwrap();
        assert!(second.rate_limit_warning.unwrap().minute_exceeded());
        assert_eq!(f.stored().len(), 2);
    }

    #[test]
    fn test_timeout_override() {
        let f = fixture(Config::builtin().unwrap());
        let mut o = opts(f.session, "rm -rf ./build");
        o.timeout_secs = Some(60);
        let req = f.create_with(o.clone()).unwrap().request.unwrap();
        assert_eq!(req.created_at.secs_until(req.request_deadline), 60);

        o.timeout_secs = Some(0);
        assert!(matches!(f.create_with(o), Err(ApprovalError::Validation(_))));
    }
}
