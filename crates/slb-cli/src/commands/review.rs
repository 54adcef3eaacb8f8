//! Approve and reject commands.

use std::path::PathBuf;

use clap::Args;
use serde_json::json;

use slb_approval::{ApprovalError, ReviewResult, SubmitReview};
use slb_core::{Decision, RequestId, SessionId};

use crate::context::CliContext;
use crate::formatter::print_json;
use crate::theme::Theme;

/// Reviewer identity and targeting shared by approve and reject.
#[derive(Debug, Args)]
pub(crate) struct ReviewerArgs {
    /// Request to review
    pub(crate) request_id: RequestId,

    /// Reviewer session ID
    #[arg(short, long, env = "SLB_SESSION_ID")]
    pub(crate) session_id: SessionId,

    /// Reviewer session key
    #[arg(short = 'k', long, env = "SLB_SESSION_KEY", hide_env_values = true)]
    pub(crate) session_key: String,

    /// Additional comments
    #[arg(short = 'm', long, default_value = "")]
    pub(crate) comments: String,

    /// Project the request belongs to, for cross-project reviews
    #[arg(long)]
    pub(crate) target_project: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub(crate) struct ApproveArgs {
    #[command(flatten)]
    pub(crate) reviewer: ReviewerArgs,
}

#[derive(Debug, Args)]
pub(crate) struct RejectArgs {
    #[command(flatten)]
    pub(crate) reviewer: ReviewerArgs,

    /// Why the request is rejected
    #[arg(short, long, default_value = "")]
    pub(crate) reason: String,
}

pub(crate) async fn approve(ctx: &CliContext, args: ApproveArgs) -> anyhow::Result<()> {
    let comments = args.reviewer.comments.clone();
    submit(ctx, args.reviewer, Decision::Approve, comments).await
}

pub(crate) async fn reject(ctx: &CliContext, args: RejectArgs) -> anyhow::Result<()> {
    if args.reason.trim().is_empty() {
        anyhow::bail!(ApprovalError::Validation("--reason is required".into()));
    }
    let comments = compose_comments(&args.reason, &args.reviewer.comments);
    submit(ctx, args.reviewer, Decision::Reject, comments).await
}

/// Stored review text: the reason, then a blank line and the comments.
pub(crate) fn compose_comments(reason: &str, comments: &str) -> String {
    let reason = reason.trim();
    let comments = comments.trim();
    match (reason.is_empty(), comments.is_empty()) {
        (false, false) => format!("{reason}\n\n{comments}"),
        (false, true) => reason.to_string(),
        (true, _) => comments.to_string(),
    }
}

async fn submit(
    ctx: &CliContext,
    reviewer: ReviewerArgs,
    decision: Decision,
    comments: String,
) -> anyhow::Result<()> {
    if reviewer.session_key.trim().is_empty() {
        anyhow::bail!(ApprovalError::Validation("--session-key is required".into()));
    }
    let target;
    let ctx = match &reviewer.target_project {
        Some(project) => {
            target = ctx.retarget(project)?;
            &target
        },
        None => ctx,
    };

    let result = ctx
        .engine()?
        .submit_review(SubmitReview {
            session_id: reviewer.session_id,
            session_key: reviewer.session_key,
            request_id: reviewer.request_id,
            decision,
            comments,
        })
        .await?;

    if ctx.format().is_json() {
        return print_json(&review_json(&result));
    }
    print_review(&result);
    Ok(())
}

fn review_json(result: &ReviewResult) -> serde_json::Value {
    json!({
        "request_id": result.review.request_id,
        "review_id": result.review.id,
        "decision": result.review.decision,
        "approvals": result.approvals,
        "rejections": result.rejections,
        "request_status_changed": result.request_status_changed,
        "new_request_status": result.new_request_status,
        "counted": result.counted,
        "effective_min_approvals": result.effective_min_approvals,
        "awaiting_tie_break": result.awaiting_tie_break,
    })
}

fn print_review(result: &ReviewResult) {
    let verb = match result.review.decision {
        Decision::Approve => "Approved",
        Decision::Reject => "Rejected",
    };
    println!(
        "{}",
        Theme::success(&format!("{verb} request {}", result.review.request_id.short()))
    );
    println!(
        "{}",
        Theme::kv(
            "Votes",
            &format!(
                "{} approve / {} reject (needs {})",
                result.approvals, result.rejections, result.effective_min_approvals
            )
        )
    );
    println!("{}", Theme::kv("Status", &Theme::status(result.new_request_status)));
    if !result.counted {
        println!(
            "{}",
            Theme::warning("Review recorded but not counted toward quorum")
        );
    }
    if result.awaiting_tie_break {
        println!("{}", Theme::info("Votes are tied; waiting for a human reviewer"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_comments_joins_reason_and_comments() {
        assert_eq!(
            compose_comments("Command too dangerous", "use --dry-run first"),
            "Command too dangerous\n\nuse --dry-run first"
        );
    }

    #[test]
    fn test_compose_comments_single_parts() {
        assert_eq!(compose_comments("  too risky ", ""), "too risky");
        assert_eq!(compose_comments("", "looks fine"), "looks fine");
        assert_eq!(compose_comments("", "  "), "");
    }
}
