//! Pending command - list requests awaiting review.

use clap::Args;
use colored::Colorize;

use slb_approval::{ApprovalError, PendingQuery};
use slb_core::{Request, SessionId};

use crate::context::CliContext;
use crate::formatter::print_json;
use crate::theme::Theme;

#[derive(Debug, Args)]
pub(crate) struct PendingArgs {
    /// Your session ID
    #[arg(short, long, env = "SLB_SESSION_ID")]
    pub(crate) session_id: Option<SessionId>,

    /// Only requests you can review (hides your own; needs --session-id)
    #[arg(long)]
    pub(crate) review_pool: bool,

    /// Include requests from every project in the ledger
    #[arg(long)]
    pub(crate) all_projects: bool,
}

impl PendingArgs {
    fn query(&self, ctx: &CliContext) -> anyhow::Result<PendingQuery> {
        let exclude_requester = if self.review_pool {
            let Some(id) = self.session_id else {
                anyhow::bail!(ApprovalError::Validation(
                    "--review-pool requires --session-id".into()
                ));
            };
            Some(id)
        } else {
            None
        };
        Ok(PendingQuery {
            project: (!self.all_projects).then(|| ctx.project.project().to_path_buf()),
            exclude_requester,
        })
    }
}

pub(crate) async fn pending(ctx: &CliContext, args: PendingArgs) -> anyhow::Result<()> {
    let query = args.query(ctx)?;
    let requests = ctx.engine()?.pending(query).await?;

    if ctx.format().is_json() {
        return print_json(&requests);
    }
    print_pending(&requests, args.all_projects);
    Ok(())
}

fn print_pending(requests: &[Request], show_project: bool) {
    if requests.is_empty() {
        println!("{}", Theme::info("No pending requests"));
        return;
    }

    println!("\n{}", Theme::header("Pending Requests"));
    println!(
        "{:<10} {:<11} {:<14} {:<20} {}",
        "ID".dimmed(),
        "TIER".dimmed(),
        "REQUESTER".dimmed(),
        "DEADLINE".dimmed(),
        "COMMAND".dimmed()
    );
    println!("{}", Theme::separator());

    for request in requests {
        println!(
            "{:<10} {:<11} {:<14} {:<20} {}",
            Theme::id(&request.id.short()),
            Theme::tier(request.risk_tier),
            request.requester_agent,
            Theme::timestamp(&request.request_deadline),
            request.display_command
        );
        if show_project {
            println!("{:<10} {}", "", request.project_path.display().to_string().dimmed());
        }
        if !request.justification.reason.is_empty() {
            println!("{:<10} {}", "", Theme::dimmed(&request.justification.reason));
        }
    }
    println!();
}
