//! Status and cancel commands.

use clap::Args;
use colored::Colorize;

use slb_approval::RequestView;
use slb_core::{RequestId, SessionId};

use crate::context::CliContext;
use crate::formatter::print_json;
use crate::theme::Theme;

#[derive(Debug, Args)]
pub(crate) struct CancelArgs {
    /// Request to cancel
    pub(crate) request_id: RequestId,

    /// Requesting session ID
    #[arg(short, long, env = "SLB_SESSION_ID")]
    pub(crate) session_id: SessionId,
}

/// Show a request, its reviews and its execution record.
pub(crate) async fn status(ctx: &CliContext, request_id: RequestId) -> anyhow::Result<()> {
    let engine = ctx.engine()?;
    // Bring deadlines up to date before reporting.
    engine.settle(request_id).await?;
    let view = engine.request(request_id).await?;

    if ctx.format().is_json() {
        return print_json(&view);
    }
    print_view(&view);
    Ok(())
}

pub(crate) async fn cancel(ctx: &CliContext, args: CancelArgs) -> anyhow::Result<()> {
    let request = ctx
        .engine()?
        .cancel(args.request_id, args.session_id)
        .await?;

    if ctx.format().is_json() {
        return print_json(&request);
    }
    println!(
        "{}",
        Theme::success(&format!("Cancelled request {}", request.id.short()))
    );
    Ok(())
}

fn print_view(view: &RequestView) {
    let request = &view.request;

    println!("\n{}", Theme::header(&format!("Request {}", request.id)));
    println!("{}", Theme::separator());
    println!("{}", Theme::kv("Status", &Theme::status(request.status)));
    println!("{}", Theme::kv("Command", &request.display_command));
    println!("{}", Theme::kv("Tier", &Theme::tier(request.risk_tier)));
    println!(
        "{}",
        Theme::kv(
            "Requester",
            &format!("{} ({})", request.requester_agent, request.requester_model)
        )
    );
    println!("{}", Theme::kv("Directory", &request.cwd.display().to_string()));
    println!("{}", Theme::kv("Created", &Theme::timestamp(&request.created_at)));
    println!("{}", Theme::kv("Deadline", &Theme::timestamp(&request.request_deadline)));
    if let Some(ttl) = &request.approval_ttl_deadline {
        println!("{}", Theme::kv("Approval valid", &Theme::timestamp(ttl)));
    }
    if request.escalated {
        println!("{}", Theme::warning("Escalated after its first deadline"));
    }
    if let Some(dry_run) = &request.dry_run_command {
        println!("{}", Theme::kv("Dry run", dry_run));
    }

    let j = &request.justification;
    for (label, text) in [
        ("Reason", &j.reason),
        ("Expected effect", &j.expected_effect),
        ("Goal", &j.goal),
        ("Safety", &j.safety_argument),
    ] {
        if !text.is_empty() {
            println!("{}", Theme::kv(label, text));
        }
    }

    println!(
        "\n{} ({} of {} required)",
        "Reviews".bold(),
        view.reviews.len(),
        request.min_approvals
    );
    if view.reviews.is_empty() {
        println!("  {}", Theme::dimmed("none yet"));
    }
    for review in &view.reviews {
        println!(
            "  {} {} {} {}",
            Theme::timestamp(&review.created_at),
            Theme::decision(review.decision),
            review.reviewer_agent,
            Theme::dimmed(&format!("({})", review.reviewer_model))
        );
        for line in review.comments.lines() {
            println!("      {line}");
        }
    }

    if let Some(exec) = &request.execution {
        println!("\n{}", "Execution".bold());
        println!("{}", Theme::kv("Exit code", &exec.exit_code.to_string()));
        println!("{}", Theme::kv("Duration", &format!("{} ms", exec.duration_ms)));
        if let Some(log) = &exec.log_path {
            println!("{}", Theme::kv("Log", &log.display().to_string()));
        }
        if let Some(rollback) = &exec.rollback_path {
            println!("{}", Theme::kv("Rollback", &rollback.display().to_string()));
        }
    }
    println!();
}
