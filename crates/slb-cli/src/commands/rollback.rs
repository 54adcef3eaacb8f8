//! Rollback command - restore the state captured before a request ran.

use clap::Args;

use slb_approval::RollbackKind;
use slb_core::RequestId;

use crate::context::CliContext;
use crate::formatter::print_json;
use crate::theme::Theme;

#[derive(Debug, Args)]
pub(crate) struct RollbackArgs {
    /// Request whose capture to restore
    pub(crate) request_id: RequestId,

    /// Overwrite existing files, or reset a git checkout
    #[arg(short, long)]
    pub(crate) force: bool,
}

pub(crate) async fn rollback(ctx: &CliContext, args: RollbackArgs) -> anyhow::Result<()> {
    let report = ctx
        .engine()?
        .restore_rollback(args.request_id, args.force)
        .await?;

    if ctx.format().is_json() {
        return print_json(&report);
    }
    let what = match report.kind {
        RollbackKind::Filesystem => format!("{} files", report.files),
        RollbackKind::Git => "git checkout".to_string(),
    };
    println!(
        "{}",
        Theme::success(&format!(
            "Restored {what} for request {} from {}",
            args.request_id.short(),
            report.path.display()
        ))
    );
    Ok(())
}
