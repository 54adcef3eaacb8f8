//! Gated execution of approved commands.
//!
//! Execution is split around the process run so no ledger transaction is
//! held open while a command executes:
//!
//! 1. [`Executor::claim`] compare-and-swaps `Approved -> Executing` after
//!    re-checking the approval TTL
//! 2. [`Executor::capture`] takes the optional rollback snapshot
//! 3. [`Executor::run`] runs the command and writes the run log
//! 4. [`Executor::finish`] records `Executed` or `ExecutionFailed`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use slb_audit::{AuditAction, AuditLog};
use slb_config::Config;
use slb_core::{ExecutionRecord, ProjectDir, Request, RequestId, RequestStatus, Timestamp};
use slb_storage::LedgerTx;

use crate::error::{ApprovalError, ApprovalResult};
use crate::escalate::TtlEscalator;
use crate::normalize::tokenize;
use crate::redact::redact;
use crate::rollback::{CaptureOutcome, RollbackCapture};

/// Exit code recorded when a run is killed for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Exit code recorded when the command could not be started.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = -1;

const SHELL_META: &[char] = &[
    '|', '&', ';', '<', '>', '(', ')', '$', '`', '*', '?', '[', ']', '~', '{', '}', '\n',
];

/// Result of [`Executor::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The request is now `Executing` and belongs to the caller.
    Claimed(Request),
    /// The approval lapsed; the request went back to `Pending`.
    Expired {
        /// When the approval stopped being valid.
        expired_at: Timestamp,
    },
}

/// What to run and how.
#[derive(Debug, Clone)]
pub struct RunSpec<'a> {
    /// Command line.
    pub command: &'a str,
    /// Working directory.
    pub cwd: &'a Path,
    /// Force `$SHELL -c`.
    pub shell: bool,
    /// Run-log file name suffix.
    pub log_prefix: String,
    /// Kill the command after this long.
    pub timeout: Option<Duration>,
}

/// A finished process run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Exit code; [`LAUNCH_FAILURE_EXIT_CODE`] or [`TIMEOUT_EXIT_CODE`] when
    /// the command did not exit on its own.
    pub exit_code: i32,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Run log, if it could be written.
    pub log_path: Option<PathBuf>,
    /// Standard output followed by standard error.
    pub output: String,
    /// Launch failure message.
    pub error: Option<String>,
    /// The run was killed at its timeout.
    pub timed_out: bool,
}

impl RunOutcome {
    /// Whether the command exited zero.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && self.error.is_none() && !self.timed_out
    }
}

/// Outcome of an execution, returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    /// Request executed; `None` for a skipped safe command.
    pub request_id: Option<RequestId>,
    /// Terminal status recorded; `None` for a skipped safe command.
    pub status: Option<RequestStatus>,
    /// Process exit code.
    pub exit_code: i32,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Run log.
    pub log_path: Option<PathBuf>,
    /// Rollback capture directory.
    pub rollback_path: Option<PathBuf>,
    /// Why rollback capture was skipped, if it was.
    pub rollback_skipped: Option<String>,
    /// Captured output.
    pub output: String,
    /// The run was killed at its timeout.
    pub timed_out: bool,
}

/// Claims, runs and records approved requests.
#[derive(Debug, Clone)]
pub struct Executor {
    config: Arc<Config>,
    project: ProjectDir,
    escalator: TtlEscalator,
    rollback: RollbackCapture,
}

impl Executor {
    /// Executor writing logs and rollback captures under `project`.
    #[must_use]
    pub fn new(config: Arc<Config>, project: ProjectDir) -> Self {
        Self {
            escalator: TtlEscalator::new(Arc::clone(&config)),
            rollback: RollbackCapture::from_config(project.clone(), &config),
            config,
            project,
        }
    }

    /// Rollback capture settings in use.
    #[must_use]
    pub fn rollback(&self) -> &RollbackCapture {
        &self.rollback
    }

    /// Take `id` for execution.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::NotFound`] for an unknown request
    /// - [`ApprovalError::Conflict`] if the request is not `Approved`, or
    ///   another executor claimed it first
    pub fn claim(&self, tx: &LedgerTx<'_>, id: &RequestId, now: Timestamp) -> ApprovalResult<Claim> {
        let request = tx
            .get_request(id)?
            .ok_or_else(|| ApprovalError::request_not_found(id))?;
        if request.status != RequestStatus::Approved {
            return Err(ApprovalError::Conflict(format!(
                "request {id} is {}; only approved requests can be executed",
                request.status
            )));
        }
        if let Some(expired_at) = request.approval_ttl_deadline.filter(|ttl| *ttl <= now) {
            self.escalator.settle(tx, id, now)?;
            warn!(request_id = %id, %expired_at, "Approval expired before execution");
            return Ok(Claim::Expired { expired_at });
        }
        if !tx.transition_status(id, RequestStatus::Approved, RequestStatus::Executing, now)? {
            return Err(ApprovalError::Conflict(format!(
                "request {id} was already claimed for execution"
            )));
        }
        AuditLog::new(tx).append(
            Some(*id),
            None,
            AuditAction::StatusChanged {
                from: RequestStatus::Approved,
                to: RequestStatus::Executing,
                reason: "execution started".into(),
            },
            now,
        )?;
        info!(request_id = %id, "Request claimed for execution");
        Ok(Claim::Claimed(Request {
            status: RequestStatus::Executing,
            ..request
        }))
    }

    /// Snapshot what the request's command is about to change.
    ///
    /// `enabled` of `None` follows `general.enable_rollback_capture`. Returns
    /// `None` when capture is off; capture failures become
    /// [`CaptureOutcome::Skipped`].
    #[must_use]
    pub fn capture(&self, request: &Request, enabled: Option<bool>, now: Timestamp) -> Option<CaptureOutcome> {
        if !enabled.unwrap_or(self.config.general.enable_rollback_capture) {
            return None;
        }
        let outcome = self
            .rollback
            .capture(&request.id, &request.command, &request.cwd, now)
            .unwrap_or_else(|e| {
                warn!(request_id = %request.id, error = %e, "Rollback capture failed");
                CaptureOutcome::Skipped {
                    reason: e.to_string(),
                }
            });
        Some(outcome)
    }

    /// Run a command and write its log. Never fails: launch errors and
    /// timeouts are part of the outcome.
    pub async fn run(&self, spec: &RunSpec<'_>, now: Timestamp) -> RunOutcome {
        let started = Instant::now();
        let mut command = build_command(spec.command, spec.shell);
        command.current_dir(spec.cwd).kill_on_drop(true);

        let result = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, command.output()).await.ok(),
            None => Some(command.output().await),
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut outcome = RunOutcome {
            exit_code: LAUNCH_FAILURE_EXIT_CODE,
            duration_ms,
            log_path: None,
            output: String::new(),
            error: None,
            timed_out: false,
        };
        match result {
            Some(Ok(output)) => {
                outcome.exit_code = output.status.code().unwrap_or(LAUNCH_FAILURE_EXIT_CODE);
                outcome.output = combine_output(&output.stdout, &output.stderr);
            },
            Some(Err(e)) => {
                outcome.error = Some(format!("failed to start command: {e}"));
            },
            None => {
                outcome.exit_code = TIMEOUT_EXIT_CODE;
                outcome.timed_out = true;
            },
        }

        let log_path = self.log_path(&spec.log_prefix, now);
        match write_log(&log_path, &render_log(spec, &outcome, now)).await {
            Ok(()) => outcome.log_path = Some(log_path),
            Err(e) => warn!(path = %log_path.display(), error = %e, "Could not write run log"),
        }
        outcome
    }

    /// Record the run against the claimed request.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Conflict`] if the request is no longer
    /// `Executing`, or a storage error.
    pub fn finish(
        &self,
        tx: &LedgerTx<'_>,
        request: &Request,
        run: &RunOutcome,
        rollback: Option<&CaptureOutcome>,
        now: Timestamp,
    ) -> ApprovalResult<ExecResult> {
        let status = if run.succeeded() {
            RequestStatus::Executed
        } else {
            RequestStatus::ExecutionFailed
        };
        let (rollback_path, rollback_skipped) = match rollback {
            Some(CaptureOutcome::Captured { path, .. }) => (Some(path.clone()), None),
            Some(CaptureOutcome::Skipped { reason }) => (None, Some(reason.clone())),
            None => (None, None),
        };
        let record = ExecutionRecord {
            exit_code: run.exit_code,
            duration_ms: run.duration_ms,
            log_path: run.log_path.clone(),
            rollback_path: rollback_path.clone(),
            executed_at: now,
        };
        if !tx.finish_execution(&request.id, status, &record)? {
            return Err(ApprovalError::Conflict(format!(
                "request {} is no longer executing",
                request.id
            )));
        }

        let audit = AuditLog::new(tx);
        match rollback {
            Some(CaptureOutcome::Captured { path, metadata }) => {
                audit.append(
                    Some(request.id),
                    None,
                    AuditAction::RollbackCaptured {
                        path: path.display().to_string(),
                        size_bytes: metadata.size_bytes,
                    },
                    now,
                )?;
            },
            Some(CaptureOutcome::Skipped { reason }) => {
                audit.append(
                    Some(request.id),
                    None,
                    AuditAction::RollbackSkipped {
                        reason: reason.clone(),
                    },
                    now,
                )?;
            },
            None => {},
        }
        audit.append(
            Some(request.id),
            None,
            AuditAction::ExecutionFinished {
                exit_code: run.exit_code,
                duration_ms: run.duration_ms,
                status,
            },
            now,
        )?;
        audit.append(
            Some(request.id),
            None,
            AuditAction::StatusChanged {
                from: RequestStatus::Executing,
                to: status,
                reason: finish_reason(run),
            },
            now,
        )?;

        info!(
            request_id = %request.id,
            exit_code = run.exit_code,
            duration_ms = run.duration_ms,
            %status,
            "Execution finished"
        );
        Ok(ExecResult {
            request_id: Some(request.id),
            status: Some(status),
            exit_code: run.exit_code,
            duration_ms: run.duration_ms,
            log_path: run.log_path.clone(),
            rollback_path,
            rollback_skipped,
            output: run.output.clone(),
            timed_out: run.timed_out,
        })
    }

    /// Run a safe command that was never persisted.
    pub async fn execute_skipped(
        &self,
        command: &str,
        cwd: &Path,
        shell: bool,
        timeout: Option<Duration>,
        now: Timestamp,
    ) -> ExecResult {
        let spec = RunSpec {
            command,
            cwd,
            shell,
            log_prefix: format!("safe-{}", RequestId::new().short()),
            timeout,
        };
        let run = self.run(&spec, now).await;
        info!(exit_code = run.exit_code, "Safe command executed without review");
        ExecResult {
            request_id: None,
            status: None,
            exit_code: run.exit_code,
            duration_ms: run.duration_ms,
            log_path: run.log_path,
            rollback_path: None,
            rollback_skipped: None,
            output: run.output,
            timed_out: run.timed_out,
        }
    }

    fn log_path(&self, prefix: &str, now: Timestamp) -> PathBuf {
        let stamp = now.into_inner().format("%Y%m%d-%H%M%S");
        self.project.logs_dir().join(format!("{stamp}_{prefix}.log"))
    }
}

/// Shell out for anything that needs shell parsing; exec directly otherwise.
fn build_command(command: &str, shell: bool) -> Command {
    let direct = if shell || command.contains(SHELL_META) {
        None
    } else {
        tokenize(command).ok().filter(|t| !t.is_empty())
    };
    if let Some(tokens) = direct {
        let mut cmd = Command::new(&tokens[0]);
        cmd.args(&tokens[1..]);
        return cmd;
    }
    let sh = std::env::var("SHELL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string());
    let mut cmd = Command::new(sh);
    cmd.arg("-c").arg(command);
    cmd
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stdout).into_owned();
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("STDERR:\n");
        text.push_str(&String::from_utf8_lossy(stderr));
    }
    text
}

fn render_log(spec: &RunSpec<'_>, outcome: &RunOutcome, started_at: Timestamp) -> String {
    let mut log = format!(
        "# slb run log\ncommand: {}\ncwd: {}\nstarted_at: {}\n\n",
        redact(spec.command),
        spec.cwd.display(),
        started_at.to_rfc3339(),
    );
    log.push_str(&outcome.output);
    if !outcome.output.is_empty() && !outcome.output.ends_with('\n') {
        log.push('\n');
    }
    if let Some(error) = &outcome.error {
        log.push_str(error);
        log.push('\n');
    }
    if outcome.timed_out {
        log.push_str("killed: timeout\n");
    }
    log.push_str(&format!(
        "\nexit_code: {}\nduration_ms: {}\n",
        outcome.exit_code, outcome.duration_ms
    ));
    log
}

async fn write_log(path: &Path, body: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut opts = tokio::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    opts.mode(0o600);
    let mut file = opts.open(path).await?;
    file.write_all(body.as_bytes()).await?;
    file.flush().await
}

fn finish_reason(run: &RunOutcome) -> String {
    if let Some(error) = &run.error {
        error.clone()
    } else if run.timed_out {
        "command timed out".into()
    } else {
        format!("exit code {}", run.exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create::{CreateRequest, RequestCreator};
    use crate::quorum::{QuorumEngine, SubmitReview};
    use crate::session::{RegisterSession, SessionAuthenticator};
    use slb_core::Decision;
    use slb_storage::Ledger;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        work: PathBuf,
        ledger: Ledger,
        executor: Executor,
        request: Request,
    }

    /// An approved `rm -rf ./build` request in a temp project.
    fn approved(ttl_minutes: u64) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("work");
        std::fs::create_dir_all(work.join("build")).unwrap();
        std::fs::write(work.join("build/out.o"), "obj").unwrap();

        let mut config = Config::builtin().unwrap();
        config.general.approval_ttl_minutes = ttl_minutes;
        let config = Arc::new(config);
        let ledger = Ledger::open_in_memory().unwrap();
        let auth = SessionAuthenticator::new(Arc::clone(&config));
        let creator = RequestCreator::new(Arc::clone(&config)).unwrap();
        let quorum = QuorumEngine::new(Arc::clone(&config));
        let now = Timestamp::now();

        let register = |agent: &str| {
            ledger
                .write(|tx| {
                    auth.register(
                        tx,
                        RegisterSession {
                            agent_name: agent.into(),
                            model: "m".into(),
                            project_path: work.clone(),
                            ..RegisterSession::default()
                        },
                        now,
                    )
                })
                .unwrap()
        };
        let requester = register("Requester");
        let reviewer = register("Reviewer");
        let created = ledger
            .write(|tx| {
                creator.create(
                    tx,
                    CreateRequest {
                        session_id: requester.session.id,
                        command: "rm -rf ./build".into(),
                        cwd: work.clone(),
                        ..CreateRequest::default()
                    },
                    now,
                )
            })
            .unwrap();
        let request_id = created.request_id().unwrap();
        ledger
            .write(|tx| {
                quorum.submit(
                    tx,
                    SubmitReview {
                        session_id: reviewer.session.id,
                        session_key: reviewer.key.to_hex(),
                        request_id,
                        decision: Decision::Approve,
                        comments: String::new(),
                    },
                    now,
                )
            })
            .unwrap();
        let request = ledger.read(|tx| tx.get_request(&request_id)).unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Approved);

        Fixture {
            executor: Executor::new(config, ProjectDir::new(tmp.path())),
            _tmp: tmp,
            work,
            ledger,
            request,
        }
    }

    fn spec<'a>(command: &'a str, cwd: &'a Path) -> RunSpec<'a> {
        RunSpec {
            command,
            cwd,
            shell: false,
            log_prefix: "test".into(),
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_run_captures_output_and_writes_log() {
        let f = approved(30);
        let outcome = f.executor.run(&spec("echo hello", &f.work), Timestamp::now()).await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.output, "hello\n");

        let log_path = outcome.log_path.unwrap();
        let name = log_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_test.log"));
        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("command: echo hello"));
        assert!(log.contains("exit_code: 0"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&log_path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[tokio::test]
    async fn test_run_non_zero_exit_and_stderr() {
        let f = approved(30);
        let outcome = f
            .executor
            .run(&spec("echo oops >&2; exit 3", &f.work), Timestamp::now())
            .await;
        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.succeeded());
        assert!(outcome.output.contains("STDERR:\noops"));
    }

    #[tokio::test]
    async fn test_run_launch_failure() {
        let f = approved(30);
        let outcome = f
            .executor
            .run(&spec("slb-no-such-binary-xyz --flag", &f.work), Timestamp::now())
            .await;
        assert_eq!(outcome.exit_code, LAUNCH_FAILURE_EXIT_CODE);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_run_timeout_kills_command() {
        let f = approved(30);
        let mut s = spec("sleep 5", &f.work);
        s.timeout = Some(Duration::from_millis(100));
        let outcome = f.executor.run(&s, Timestamp::now()).await;
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
    }

    #[test]
    fn test_claim_moves_to_executing_once() {
        let f = approved(30);
        let now = Timestamp::now();
        let claim = f
            .ledger
            .write(|tx| f.executor.claim(tx, &f.request.id, now))
            .unwrap();
        let Claim::Claimed(request) = claim else {
            panic!("expected claim");
        };
        assert_eq!(request.status, RequestStatus::Executing);

        let second = f
            .ledger
            .write(|tx| f.executor.claim(tx, &f.request.id, now))
            .unwrap_err();
        assert!(matches!(second, ApprovalError::Conflict(_)));
    }

    #[test]
    fn test_expired_approval_reverts_on_claim() {
        let f = approved(1);
        let later = Timestamp::now().plus_secs(120);
        let claim = f
            .ledger
            .write(|tx| f.executor.claim(tx, &f.request.id, later))
            .unwrap();
        assert!(matches!(claim, Claim::Expired { .. }));
        let stored = f.ledger.read(|tx| tx.get_request(&f.request.id)).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
        assert!(stored.approval_ttl_deadline.is_none());
    }

    #[tokio::test]
    async fn test_full_execution_records_outcome_and_rollback() {
        let f = approved(30);
        let now = Timestamp::now();
        let Claim::Claimed(request) = f
            .ledger
            .write(|tx| f.executor.claim(tx, &f.request.id, now))
            .unwrap()
        else {
            panic!("expected claim");
        };
        let rollback = f.executor.capture(&request, Some(true), now);
        assert!(matches!(rollback, Some(CaptureOutcome::Captured { .. })));

        let run = f
            .executor
            .run(&spec(&request.command, &request.cwd), now)
            .await;
        assert!(!f.work.join("build").exists());

        let result = f
            .ledger
            .write(|tx| f.executor.finish(tx, &request, &run, rollback.as_ref(), now))
            .unwrap();
        assert_eq!(result.status, Some(RequestStatus::Executed));
        assert!(result.rollback_path.is_some());

        let stored = f.ledger.read(|tx| tx.get_request(&request.id)).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Executed);
        let execution = stored.execution.unwrap();
        assert_eq!(execution.exit_code, 0);
        assert_eq!(execution.rollback_path, result.rollback_path);

        let entries = f
            .ledger
            .read(|tx| AuditLog::new(tx).entries(Some(&request.id)).map_err(ApprovalError::from))
            .unwrap();
        assert!(entries
            .iter()
            .any(|e| matches!(e.action, AuditAction::RollbackCaptured { .. })));
        assert!(entries.iter().any(|e| matches!(
            e.action,
            AuditAction::ExecutionFinished {
                status: RequestStatus::Executed,
                ..
            }
        )));

        f.executor.rollback().restore(&request.id, false).unwrap();
        assert_eq!(std::fs::read_to_string(f.work.join("build/out.o")).unwrap(), "obj");
    }

    #[tokio::test]
    async fn test_failed_command_is_execution_failed() {
        let f = approved(30);
        let now = Timestamp::now();
        let Claim::Claimed(request) = f
            .ledger
            .write(|tx| f.executor.claim(tx, &f.request.id, now))
            .unwrap()
        else {
            panic!("expected claim");
        };
        let mut s = spec("exit 2", &f.work);
        s.shell = true;
        let run = f.executor.run(&s, now).await;
        let result = f
            .ledger
            .write(|tx| f.executor.finish(tx, &request, &run, None, now))
            .unwrap();
        assert_eq!(result.status, Some(RequestStatus::ExecutionFailed));
        assert_eq!(result.exit_code, 2);
    }

    #[tokio::test]
    async fn test_execute_skipped_has_no_request() {
        let f = approved(30);
        let result = f
            .executor
            .execute_skipped("echo safe", &f.work, false, None, Timestamp::now())
            .await;
        assert_eq!(result.request_id, None);
        assert_eq!(result.exit_code, 0);
        assert!(result.log_path.is_some());
    }

    #[test]
    fn test_build_command_picks_shell_for_metacharacters() {
        let direct = build_command("ls -la /tmp", false);
        assert_eq!(direct.as_std().get_program(), "ls");
        let shelled = build_command("ls | wc -l", false);
        assert_ne!(shelled.as_std().get_program(), "ls");
    }
}
