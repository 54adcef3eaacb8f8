//! Async facade over the decision engine.
//!
//! Every ledger operation runs on the blocking pool inside a single SQLite
//! transaction. Notifications go out after the transaction commits.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};

use slb_audit::{AuditAction, AuditLog, ChainVerificationResult};
use slb_config::Config;
use slb_core::{ProjectDir, Request, RequestId, RequestStatus, Review, Session, SessionId, Timestamp};
use slb_storage::{Ledger, LedgerTx, RequestFilter};

use crate::clock::{Clock, SystemClock};
use crate::create::{CreateRequest, CreateResult, RequestCreator, audit_rate_limit_denial};
use crate::error::{ApprovalError, ApprovalResult};
use crate::escalate::{EscalationEvent, EscalationReport, TtlEscalator};
use crate::execute::{Claim, ExecResult, Executor, RunSpec};
use crate::notify::{LogNotifier, NotificationEvent, Notifier, dispatch};
use crate::quorum::{QuorumEngine, ReviewResult, SubmitReview};
use crate::rollback::RestoreReport;
use crate::session::{RegisterSession, RegisteredSession, SessionAuthenticator};

/// Default interval of the approval wait loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Rate-limit admissions are only consulted for a minute; older rows are noise.
const ADMISSION_RETENTION_SECS: u64 = 86_400;

/// What the wait loop should do given a request's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollDecision {
    /// Approved: run it.
    Execute,
    /// Nothing left to wait for.
    Stop,
    /// Still under review.
    KeepPolling,
}

/// Map a status to the wait loop's next step.
#[must_use]
pub fn poll_decision(status: RequestStatus) -> PollDecision {
    match status {
        RequestStatus::Approved => PollDecision::Execute,
        RequestStatus::Pending => PollDecision::KeepPolling,
        RequestStatus::Executing
        | RequestStatus::Executed
        | RequestStatus::ExecutionFailed
        | RequestStatus::Rejected
        | RequestStatus::Cancelled
        | RequestStatus::Timeout => PollDecision::Stop,
    }
}

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The request left `Pending`.
    Decided(Request),
    /// The caller's shutdown signal fired first.
    Interrupted(Request),
}

/// A request with its reviews.
#[derive(Debug, Clone, Serialize)]
pub struct RequestView {
    /// The request.
    pub request: Request,
    /// Every review on record, oldest first.
    pub reviews: Vec<Review>,
}

/// Which pending requests to list.
#[derive(Debug, Clone, Default)]
pub struct PendingQuery {
    /// Only this project; `None` lists every project.
    pub project: Option<PathBuf>,
    /// Hide requests opened by this session.
    pub exclude_requester: Option<SessionId>,
}

/// Options for executing an approved request.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Request to execute.
    pub request_id: RequestId,
    /// Caller's session; when set it must be the requester.
    pub session_id: Option<SessionId>,
    /// Override `general.enable_rollback_capture`.
    pub capture_rollback: Option<bool>,
    /// Kill the command after this long.
    pub timeout: Option<Duration>,
}

/// What a history prune removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Audit entries older than `history.retention_days`.
    pub audit_entries: usize,
    /// Stale rate-limit admissions.
    pub admissions: usize,
    /// Rollback captures older than `history.rollback_retention_days`.
    pub rollback_captures: usize,
}

/// Builder for [`ApprovalEngine`].
pub struct ApprovalEngineBuilder {
    ledger: Ledger,
    config: Arc<Config>,
    project: ProjectDir,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl ApprovalEngineBuilder {
    /// Replace the wall clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the logging notifier.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Config`] if a pattern does not compile.
    pub fn build(self) -> ApprovalResult<ApprovalEngine> {
        let config = self.config;
        let inner = Inner {
            sessions: SessionAuthenticator::new(Arc::clone(&config)),
            creator: RequestCreator::new(Arc::clone(&config))?,
            quorum: QuorumEngine::new(Arc::clone(&config)),
            escalator: TtlEscalator::new(Arc::clone(&config)),
            executor: Executor::new(Arc::clone(&config), self.project.clone()),
            ledger: self.ledger,
            project: self.project,
            clock: self.clock,
            notifier: self.notifier,
            config,
        };
        Ok(ApprovalEngine {
            inner: Arc::new(inner),
        })
    }
}

struct Inner {
    ledger: Ledger,
    config: Arc<Config>,
    project: ProjectDir,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    sessions: SessionAuthenticator,
    creator: RequestCreator,
    quorum: QuorumEngine,
    escalator: TtlEscalator,
    executor: Executor,
}

/// The approval gate: sessions, requests, reviews, timeouts and execution.
///
/// Cheap to clone; clones share one ledger handle.
#[derive(Clone)]
pub struct ApprovalEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ApprovalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalEngine")
            .field("ledger", &self.inner.ledger)
            .field("project", &self.inner.project)
            .finish_non_exhaustive()
    }
}

impl ApprovalEngine {
    /// Start building an engine over `ledger` for `project`.
    #[must_use]
    pub fn builder(ledger: Ledger, config: Arc<Config>, project: ProjectDir) -> ApprovalEngineBuilder {
        ApprovalEngineBuilder {
            ledger,
            config,
            project,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotifier),
        }
    }

    /// The configuration in effect.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The project this engine serves.
    #[must_use]
    pub fn project(&self) -> &ProjectDir {
        &self.inner.project
    }

    /// The ledger handle.
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.inner.ledger
    }

    /// Current time according to the engine's clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.inner.clock.now()
    }

    // -- sessions ----------------------------------------------------------

    /// Register a session. The returned key is shown to the caller once.
    ///
    /// # Errors
    ///
    /// See [`SessionAuthenticator::register`].
    pub async fn start_session(&self, opts: RegisterSession) -> ApprovalResult<RegisteredSession> {
        self.write(move |inner, tx, now| inner.sessions.register(tx, opts, now))
            .await
    }

    /// End a session.
    ///
    /// # Errors
    ///
    /// See [`SessionAuthenticator::end`].
    pub async fn end_session(&self, id: SessionId) -> ApprovalResult<Session> {
        self.write(move |inner, tx, now| inner.sessions.end(tx, &id, now))
            .await
    }

    /// Bump a session's `last_active`.
    ///
    /// # Errors
    ///
    /// See [`SessionAuthenticator::heartbeat`].
    pub async fn heartbeat(&self, id: SessionId) -> ApprovalResult<Session> {
        self.write(move |inner, tx, now| inner.sessions.heartbeat(tx, &id, now))
            .await
    }

    /// Sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn list_sessions(&self, project: Option<PathBuf>, active_only: bool) -> ApprovalResult<Vec<Session>> {
        self.read(move |_, tx, _| Ok(tx.list_sessions(project.as_deref(), active_only)?))
            .await
    }

    /// Start a fresh rate-limit window for a session.
    ///
    /// # Errors
    ///
    /// See [`SessionAuthenticator::reset_rate_limits`].
    pub async fn reset_rate_limits(&self, id: SessionId) -> ApprovalResult<()> {
        self.write(move |inner, tx, now| inner.sessions.reset_rate_limits(tx, &id, now))
            .await
    }

    // -- requests ----------------------------------------------------------

    /// Classify and open a request.
    ///
    /// A refused admission is audited in its own transaction, since the
    /// creation itself rolled back.
    ///
    /// # Errors
    ///
    /// See [`RequestCreator::create`].
    pub async fn create_request(&self, opts: CreateRequest) -> ApprovalResult<CreateResult> {
        let result = self
            .write(move |inner, tx, now| inner.creator.create(tx, opts, now))
            .await;
        match result {
            Ok(created) => {
                if let Some(request) = &created.request {
                    self.notify(NotificationEvent::RequestCreated {
                        request_id: request.id,
                        tier: request.risk_tier,
                        command: request.display_command.clone(),
                        requester_agent: request.requester_agent.clone(),
                        min_approvals: request.min_approvals,
                    })
                    .await;
                }
                Ok(created)
            },
            Err(ApprovalError::RateLimited(denial)) => {
                let audit = denial.clone();
                if let Err(e) = self
                    .write(move |_, tx, now| audit_rate_limit_denial(tx, &audit, now))
                    .await
                {
                    warn!(error = %e, "Could not audit rate-limit denial");
                }
                Err(ApprovalError::RateLimited(denial))
            },
            Err(e) => Err(e),
        }
    }

    /// Submit a signed review.
    ///
    /// # Errors
    ///
    /// See [`QuorumEngine::submit`].
    pub async fn submit_review(&self, opts: SubmitReview) -> ApprovalResult<ReviewResult> {
        let request_id = opts.request_id;
        let result = self
            .write(move |inner, tx, now| inner.quorum.submit(tx, opts, now))
            .await?;
        if result.request_status_changed {
            self.notify(NotificationEvent::StatusChanged {
                request_id,
                from: RequestStatus::Pending,
                to: result.new_request_status,
            })
            .await;
        }
        Ok(result)
    }

    /// Withdraw a request. Only its requester may do this, and only before
    /// execution starts.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::NotFound`] for an unknown request or session
    /// - [`ApprovalError::Authorization`] if `session_id` is not the requester
    /// - [`ApprovalError::Conflict`] if the request is past cancelling
    pub async fn cancel(&self, request_id: RequestId, session_id: SessionId) -> ApprovalResult<Request> {
        let (from, request) = self
            .write(move |inner, tx, now| {
                inner.sessions.active_session(tx, &session_id)?;
                let request = tx
                    .get_request(&request_id)?
                    .ok_or_else(|| ApprovalError::request_not_found(request_id))?;
                if request.requester_session_id != session_id {
                    return Err(ApprovalError::Authorization(
                        "only the requesting session can cancel a request".into(),
                    ));
                }
                let from = request.status;
                if !from.can_transition_to(RequestStatus::Cancelled)
                    || !tx.transition_status(&request_id, from, RequestStatus::Cancelled, now)?
                {
                    return Err(ApprovalError::Conflict(format!(
                        "request {request_id} is {from} and cannot be cancelled"
                    )));
                }
                AuditLog::new(tx).append(
                    Some(request_id),
                    Some(session_id),
                    AuditAction::StatusChanged {
                        from,
                        to: RequestStatus::Cancelled,
                        reason: "cancelled by requester".into(),
                    },
                    now,
                )?;
                info!(request_id = %request_id, "Request cancelled");
                let request = tx
                    .get_request(&request_id)?
                    .ok_or_else(|| ApprovalError::request_not_found(request_id))?;
                Ok((from, request))
            })
            .await?;
        self.notify(NotificationEvent::StatusChanged {
            request_id,
            from,
            to: RequestStatus::Cancelled,
        })
        .await;
        Ok(request)
    }

    /// A request and its reviews.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::NotFound`] for an unknown request.
    pub async fn request(&self, id: RequestId) -> ApprovalResult<RequestView> {
        self.read(move |_, tx, _| {
            let request = tx
                .get_request(&id)?
                .ok_or_else(|| ApprovalError::request_not_found(id))?;
            let reviews = tx.reviews_for(&id)?;
            Ok(RequestView { request, reviews })
        })
        .await
    }

    /// Requests awaiting review, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn pending(&self, query: PendingQuery) -> ApprovalResult<Vec<Request>> {
        self.read(move |_, tx, _| {
            let requests = tx.list_requests(&RequestFilter::pending(query.project.as_deref()))?;
            Ok(requests
                .into_iter()
                .filter(|r| query.exclude_requester != Some(r.requester_session_id))
                .collect())
        })
        .await
    }

    /// Requests matching an arbitrary filter.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn list_requests(&self, filter: RequestFilter) -> ApprovalResult<Vec<Request>> {
        self.read(move |_, tx, _| Ok(tx.list_requests(&filter)?)).await
    }

    // -- timeouts ----------------------------------------------------------

    /// One escalation pass over the whole ledger.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn escalate(&self) -> ApprovalResult<EscalationReport> {
        let report = self
            .write(|inner, tx, now| inner.escalator.sweep(tx, now))
            .await?;
        for event in &report.events {
            self.notify_escalation(event).await;
        }
        Ok(report)
    }

    /// Apply whatever is due to one request and return its current state.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::NotFound`] for an unknown request.
    pub async fn settle(&self, id: RequestId) -> ApprovalResult<Request> {
        let (event, request) = self
            .write(move |inner, tx, now| {
                let event = inner.escalator.settle(tx, &id, now)?;
                let request = tx
                    .get_request(&id)?
                    .ok_or_else(|| ApprovalError::request_not_found(id))?;
                Ok((event, request))
            })
            .await?;
        if let Some(event) = &event {
            self.notify_escalation(event).await;
        }
        Ok(request)
    }

    /// Poll until the request leaves `Pending` or `shutdown` resolves.
    ///
    /// Each poll also applies due timeouts, so a requester waiting alone
    /// still sees its deadline enforced.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::NotFound`] for an unknown request, or a
    /// storage error.
    pub async fn wait_for_decision<S>(
        &self,
        id: RequestId,
        interval: Duration,
        shutdown: S,
    ) -> ApprovalResult<WaitOutcome>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let request = self.settle(id).await?;
            match poll_decision(request.status) {
                PollDecision::Execute | PollDecision::Stop => return Ok(WaitOutcome::Decided(request)),
                PollDecision::KeepPolling => {},
            }
            debug!(request_id = %id, "Awaiting decision");
            tokio::select! {
                () = &mut shutdown => {
                    info!(request_id = %id, "Wait interrupted");
                    return Ok(WaitOutcome::Interrupted(request));
                },
                () = tokio::time::sleep(interval) => {},
            }
        }
    }

    /// Close a request whose requester stopped waiting for a decision.
    ///
    /// A still-pending request moves to `Timeout`. A request decided in the
    /// meantime is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::NotFound`] for an unknown request, or a
    /// storage error.
    pub async fn abandon_wait(&self, id: RequestId) -> ApprovalResult<Request> {
        let (timed_out, request) = self
            .write(move |_, tx, now| {
                let timed_out =
                    tx.transition_status(&id, RequestStatus::Pending, RequestStatus::Timeout, now)?;
                if timed_out {
                    AuditLog::new(tx).append(
                        Some(id),
                        None,
                        AuditAction::StatusChanged {
                            from: RequestStatus::Pending,
                            to: RequestStatus::Timeout,
                            reason: "requester stopped waiting".into(),
                        },
                        now,
                    )?;
                    warn!(request_id = %id, "Wait expired; request timed out");
                }
                let request = tx
                    .get_request(&id)?
                    .ok_or_else(|| ApprovalError::request_not_found(id))?;
                Ok((timed_out, request))
            })
            .await?;
        if timed_out {
            self.notify(NotificationEvent::StatusChanged {
                request_id: id,
                from: RequestStatus::Pending,
                to: RequestStatus::Timeout,
            })
            .await;
        }
        Ok(request)
    }

    /// Sit out a safe tier's auto-approve delay before its command runs.
    ///
    /// Returns `false` if `shutdown` resolved first.
    pub async fn auto_approve_delay<S>(&self, delay: Duration, shutdown: S) -> bool
    where
        S: Future<Output = ()>,
    {
        if delay.is_zero() {
            return true;
        }
        info!(delay_secs = delay.as_secs(), "Holding safe command for auto-approve delay");
        tokio::select! {
            () = shutdown => {
                info!("Auto-approve delay interrupted");
                false
            },
            () = tokio::time::sleep(delay) => true,
        }
    }

    // -- execution ---------------------------------------------------------

    /// Claim, snapshot, run and record an approved request.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::Timeout`] if the approval lapsed; the request is
    ///   back in `Pending`
    /// - [`ApprovalError::Authorization`] if `session_id` is not the requester
    /// - the errors of [`Executor::claim`] and [`Executor::finish`]
    ///
    /// A command that fails to start or exits non-zero is not an error; it is
    /// recorded as `ExecutionFailed` in the result.
    pub async fn execute(&self, opts: ExecuteOptions) -> ApprovalResult<ExecResult> {
        let id = opts.request_id;
        let caller = opts.session_id;
        let claim = self
            .write(move |inner, tx, now| {
                if let Some(caller) = caller {
                    let request = tx
                        .get_request(&id)?
                        .ok_or_else(|| ApprovalError::request_not_found(id))?;
                    if request.requester_session_id != caller {
                        return Err(ApprovalError::Authorization(
                            "only the requesting session can execute a request".into(),
                        ));
                    }
                }
                inner.executor.claim(tx, &id, now)
            })
            .await?;

        let request = match claim {
            Claim::Claimed(request) => request,
            Claim::Expired { expired_at } => {
                self.notify(NotificationEvent::StatusChanged {
                    request_id: id,
                    from: RequestStatus::Approved,
                    to: RequestStatus::Pending,
                })
                .await;
                return Err(ApprovalError::Timeout(format!(
                    "approval for request {id} expired at {expired_at}; it needs fresh review"
                )));
            },
        };

        let inner = Arc::clone(&self.inner);
        let snapshot = request.clone();
        let capture = opts.capture_rollback;
        let rollback = tokio::task::spawn_blocking(move || {
            let now = inner.clock.now();
            inner.executor.capture(&snapshot, capture, now)
        })
        .await
        .map_err(|e| ApprovalError::Internal(format!("spawn_blocking failed: {e}")))?;

        let spec = RunSpec {
            command: &request.command,
            cwd: &request.cwd,
            shell: request.shell,
            log_prefix: request.id.short(),
            timeout: opts.timeout,
        };
        let run = self.inner.executor.run(&spec, self.now()).await;

        let finished = request.clone();
        let result = self
            .write(move |inner, tx, now| inner.executor.finish(tx, &finished, &run, rollback.as_ref(), now))
            .await?;
        if let Some(status) = result.status {
            self.notify(NotificationEvent::StatusChanged {
                request_id: id,
                from: RequestStatus::Executing,
                to: status,
            })
            .await;
        }
        Ok(result)
    }

    /// Run a safe command that needed no request.
    pub async fn execute_skipped(
        &self,
        command: &str,
        cwd: &Path,
        shell: bool,
        timeout: Option<Duration>,
    ) -> ExecResult {
        self.inner
            .executor
            .execute_skipped(command, cwd, shell, timeout, self.now())
            .await
    }

    // -- rollback and history ----------------------------------------------

    /// Restore the rollback capture taken before `id` ran.
    ///
    /// # Errors
    ///
    /// See [`crate::RollbackCapture::restore`].
    pub async fn restore_rollback(&self, id: RequestId, force: bool) -> ApprovalResult<RestoreReport> {
        let inner = Arc::clone(&self.inner);
        let report = tokio::task::spawn_blocking(move || inner.executor.rollback().restore(&id, force))
            .await
            .map_err(|e| ApprovalError::Internal(format!("spawn_blocking failed: {e}")))??;
        let audited = report.clone();
        self.write(move |_, tx, now| {
            AuditLog::new(tx).append(
                Some(id),
                None,
                AuditAction::RollbackRestored {
                    path: audited.path.display().to_string(),
                    files: audited.files,
                },
                now,
            )?;
            Ok(())
        })
        .await?;
        Ok(report)
    }

    /// Check the audit hash chain.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn verify_audit(&self) -> ApprovalResult<ChainVerificationResult> {
        self.read(|_, tx, _| Ok(AuditLog::new(tx).verify_chain()?)).await
    }

    /// Audit entries, optionally for one request.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn audit_entries(&self, request_id: Option<RequestId>) -> ApprovalResult<Vec<slb_audit::AuditEntry>> {
        self.read(move |_, tx, _| Ok(AuditLog::new(tx).entries(request_id.as_ref())?))
            .await
    }

    /// Drop history past its retention.
    ///
    /// # Errors
    ///
    /// Returns a storage error, or [`ApprovalError::Internal`] if a rollback
    /// capture cannot be removed.
    pub async fn prune_history(&self) -> ApprovalResult<PruneReport> {
        let (audit_entries, admissions) = self
            .write(|inner, tx, now| {
                let audit = AuditLog::new(tx).prune(inner.config.history.retention_days, now)?;
                let admissions = tx.prune_admissions(now.minus_secs(ADMISSION_RETENTION_SECS))?;
                Ok((audit, admissions))
            })
            .await?;

        let inner = Arc::clone(&self.inner);
        let rollback_captures = tokio::task::spawn_blocking(move || {
            let now = SystemTime::from(inner.clock.now().into_inner());
            inner
                .executor
                .rollback()
                .prune(inner.config.history.rollback_retention_days, now)
        })
        .await
        .map_err(|e| ApprovalError::Internal(format!("spawn_blocking failed: {e}")))??;

        let report = PruneReport {
            audit_entries,
            admissions,
            rollback_captures,
        };
        info!(?report, "History pruned");
        Ok(report)
    }

    // -- plumbing ----------------------------------------------------------

    async fn write<T, F>(&self, f: F) -> ApprovalResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner, &LedgerTx<'_>, Timestamp) -> ApprovalResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let now = inner.clock.now();
            inner.ledger.write(|tx| f(&inner, tx, now))
        })
        .await
        .map_err(|e| ApprovalError::Internal(format!("spawn_blocking failed: {e}")))?
    }

    async fn read<T, F>(&self, f: F) -> ApprovalResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner, &LedgerTx<'_>, Timestamp) -> ApprovalResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let now = inner.clock.now();
            inner.ledger.read(|tx| f(&inner, tx, now))
        })
        .await
        .map_err(|e| ApprovalError::Internal(format!("spawn_blocking failed: {e}")))?
    }

    async fn notify(&self, event: NotificationEvent) {
        dispatch(self.inner.notifier.as_ref(), event).await;
    }

    async fn notify_escalation(&self, event: &EscalationEvent) {
        let notification = match event {
            EscalationEvent::Escalated { request_id, deadline } => NotificationEvent::RequestEscalated {
                request_id: *request_id,
                deadline: *deadline,
            },
            other => match other.transition() {
                Some((from, to)) => NotificationEvent::StatusChanged {
                    request_id: other.request_id(),
                    from,
                    to,
                },
                None => return,
            },
        };
        self.notify(notification).await;
    }
}
