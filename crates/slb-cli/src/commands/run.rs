//! Run command - request approval for a command, wait, then execute it.

use std::time::Duration;

use clap::Args;
use colored::Colorize;
use serde_json::json;
use tracing::debug;

use slb_approval::{
    ApprovalEngine, CreateRequest, CreateResult, DEFAULT_POLL_INTERVAL, ExecResult, ExecuteOptions,
    WaitOutcome,
};
use slb_core::{Justification, Request, RequestId, RequestStatus, SessionId};

use crate::context::CliContext;
use crate::formatter::{Outcome, print_json};
use crate::theme::Theme;

#[derive(Debug, Args)]
pub(crate) struct RunArgs {
    /// The command line to run
    pub(crate) command: String,

    /// Requesting session ID
    #[arg(short, long, env = "SLB_SESSION_ID")]
    pub(crate) session_id: SessionId,

    /// Why the command is needed
    #[arg(long, default_value = "")]
    pub(crate) reason: String,

    /// What the command is expected to do
    #[arg(long, default_value = "")]
    pub(crate) expected_effect: String,

    /// Goal the command serves
    #[arg(long, default_value = "")]
    pub(crate) goal: String,

    /// Why running it is safe
    #[arg(long, default_value = "")]
    pub(crate) safety: String,

    /// Seconds to wait for a decision
    #[arg(long, default_value_t = 300)]
    pub(crate) timeout: u64,

    /// Return the request id instead of waiting for review
    #[arg(long = "yield")]
    pub(crate) yield_: bool,

    /// Skip rollback capture
    #[arg(long)]
    pub(crate) no_rollback: bool,

    /// Kill the command after this many seconds
    #[arg(long)]
    pub(crate) exec_timeout: Option<u64>,
}

#[derive(Debug, Args)]
pub(crate) struct ExecuteArgs {
    /// Approved request to execute
    pub(crate) request_id: RequestId,

    /// Requesting session ID
    #[arg(short, long, env = "SLB_SESSION_ID")]
    pub(crate) session_id: SessionId,

    /// Skip rollback capture
    #[arg(long)]
    pub(crate) no_rollback: bool,

    /// Kill the command after this many seconds
    #[arg(long)]
    pub(crate) exec_timeout: Option<u64>,
}

pub(crate) async fn run(ctx: &CliContext, args: RunArgs) -> anyhow::Result<Outcome> {
    let engine = ctx.engine()?;
    let cwd = std::env::current_dir().unwrap_or_else(|_| ctx.project.project().to_path_buf());

    let created = engine
        .create_request(CreateRequest {
            session_id: args.session_id,
            command: args.command.clone(),
            cwd: cwd.clone(),
            shell: true,
            justification: Justification {
                reason: args.reason,
                expected_effect: args.expected_effect,
                goal: args.goal,
                safety_argument: args.safety,
            },
            project_path: Some(ctx.project.project().to_path_buf()),
            ..CreateRequest::default()
        })
        .await?;

    if let Some(warning) = &created.rate_limit_warning {
        eprintln!("{}", Theme::warning(&format!("rate limit: {warning}")));
    }

    let exec_timeout = args.exec_timeout.map(Duration::from_secs);
    let Some(request) = created.request.clone() else {
        let delay = Duration::from_secs(created.auto_approve_delay_secs);
        if !delay.is_zero() && !ctx.format().is_json() {
            println!(
                "{}",
                Theme::dimmed(&format!(
                    "Safe command; running in {}s (Ctrl-C to abort)...",
                    delay.as_secs()
                ))
            );
        }
        if !engine.auto_approve_delay(delay, interrupted()).await {
            report_status_failure(ctx, &args.command, "interrupted", "aborted before the command ran")?;
            return Ok(Outcome::Failure);
        }
        let result = engine
            .execute_skipped(&args.command, &cwd, true, exec_timeout)
            .await;
        return report_execution(ctx, &result, Some(&created));
    };

    if request.status == RequestStatus::Pending && args.yield_ {
        if ctx.format().is_json() {
            print_json(&json!({
                "status": "pending",
                "request_id": request.id,
                "tier": request.risk_tier,
                "min_approvals": request.min_approvals,
                "message": format!(
                    "Request created, yielding to background. Check status with: slb status {}",
                    request.id
                ),
            }))?;
        } else {
            print_created(&created, &request);
            println!(
                "{}",
                Theme::info(&format!("Yielding. Check status with: slb status {}", request.id))
            );
        }
        return Ok(Outcome::Success);
    }

    if !ctx.format().is_json() {
        print_created(&created, &request);
        println!("{}", Theme::dimmed("Waiting for review (Ctrl-C to stop waiting)..."));
    }

    let Some(decided) = wait(ctx, &engine, &args.command, request.id, args.timeout).await? else {
        return Ok(Outcome::Failure);
    };
    if decided.status != RequestStatus::Approved {
        report_status_failure(
            ctx,
            &args.command,
            decided.status.as_str(),
            &format!("request {}: {}", decided.id, decided.status),
        )?;
        return Ok(Outcome::Failure);
    }

    let result = engine
        .execute(ExecuteOptions {
            request_id: decided.id,
            session_id: Some(args.session_id),
            capture_rollback: args.no_rollback.then_some(false),
            timeout: exec_timeout,
        })
        .await?;
    report_execution(ctx, &result, None)
}

/// Execute a request that was approved after a `--yield`.
pub(crate) async fn execute(ctx: &CliContext, args: ExecuteArgs) -> anyhow::Result<Outcome> {
    let result = ctx
        .engine()?
        .execute(ExecuteOptions {
            request_id: args.request_id,
            session_id: Some(args.session_id),
            capture_rollback: args.no_rollback.then_some(false),
            timeout: args.exec_timeout.map(Duration::from_secs),
        })
        .await?;
    report_execution(ctx, &result, None)
}

/// Poll until the request leaves `Pending`, the wait budget runs out, or
/// the user interrupts. An expired budget closes the request as `Timeout`.
/// `None` means the failure was already reported.
async fn wait(
    ctx: &CliContext,
    engine: &ApprovalEngine,
    command: &str,
    id: RequestId,
    timeout_secs: u64,
) -> anyhow::Result<Option<Request>> {
    let waited = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        engine.wait_for_decision(id, DEFAULT_POLL_INTERVAL, interrupted()),
    )
    .await;

    match waited {
        Ok(outcome) => match outcome? {
            WaitOutcome::Decided(request) => Ok(Some(request)),
            WaitOutcome::Interrupted(request) => {
                debug!(request_id = %id, "Stopped waiting on interrupt");
                report_status_failure(
                    ctx,
                    command,
                    "interrupted",
                    &format!(
                        "stopped waiting; request {} is still {}",
                        request.id, request.status
                    ),
                )?;
                Ok(None)
            },
        },
        Err(_) => {
            let request = engine.abandon_wait(id).await?;
            if request.status != RequestStatus::Timeout {
                return Ok(Some(request));
            }
            report_status_failure(
                ctx,
                command,
                "timeout",
                &format!("request {id} timed out waiting for approval"),
            )?;
            Ok(None)
        },
    }
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn print_created(created: &CreateResult, request: &Request) {
    println!("\n{}", Theme::header("Approval requested"));
    println!("{}", Theme::kv("Request", &request.id.to_string()));
    println!("{}", Theme::kv("Command", &created.display_command));
    println!("{}", Theme::kv("Tier", &Theme::tier(request.risk_tier)));
    println!(
        "{}",
        Theme::kv("Approvals", &request.min_approvals.to_string())
    );
    if let Some(dry_run) = &created.dry_run_command {
        println!("{}", Theme::kv("Dry run", dry_run));
    }
    if let Some(pattern) = &created.classification.matched_pattern {
        println!("{}", Theme::kv("Matched", &pattern.dimmed().to_string()));
    }
}

/// Report a decided-but-not-approved or abandoned wait.
fn report_status_failure(
    ctx: &CliContext,
    command: &str,
    status: &str,
    message: &str,
) -> anyhow::Result<()> {
    if ctx.format().is_json() {
        return print_json(&json!({
            "status": status,
            "command": command,
            "error": message,
        }));
    }
    eprintln!("{}", Theme::error(message));
    Ok(())
}

fn report_execution(
    ctx: &CliContext,
    result: &ExecResult,
    skipped: Option<&CreateResult>,
) -> anyhow::Result<Outcome> {
    let ok = result.exit_code == 0 && !result.timed_out;

    if ctx.format().is_json() {
        let mut doc = serde_json::to_value(result)?;
        if let Some(created) = skipped {
            doc["tier"] = json!(created.classification.tier);
            doc["skipped_approval"] = json!(true);
        }
        print_json(&doc)?;
        return Ok(Outcome::from_success(ok));
    }

    if !result.output.is_empty() {
        print!("{}", result.output);
        if !result.output.ends_with('\n') {
            println!();
        }
    }
    if let Some(note) = &result.rollback_skipped {
        eprintln!("{}", Theme::dimmed(&format!("[slb] rollback not captured: {note}")));
    }
    if let Some(path) = &result.rollback_path {
        eprintln!(
            "{}",
            Theme::dimmed(&format!("[slb] rollback captured at {}", path.display()))
        );
    }
    if result.timed_out {
        eprintln!("{}", Theme::error("Command timed out and was killed"));
    } else if !ok {
        eprintln!(
            "{}",
            Theme::error(&format!("Command exited with code {}", result.exit_code))
        );
    }
    if let Some(log) = &result.log_path {
        eprintln!("{}", Theme::dimmed(&format!("[slb] log: {}", log.display())));
    }
    Ok(Outcome::from_success(ok))
}
