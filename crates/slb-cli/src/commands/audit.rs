//! Audit command - view, verify and prune the audit trail.

use clap::Subcommand;
use colored::Colorize;

use slb_audit::{AuditEntry, ChainVerificationResult};
use slb_core::RequestId;

use crate::context::CliContext;
use crate::formatter::{Outcome, print_json};
use crate::theme::Theme;

#[derive(Debug, Subcommand)]
pub(crate) enum AuditCommands {
    /// Show audit entries
    Show {
        /// Only entries for this request
        #[arg(short, long)]
        request_id: Option<RequestId>,
    },
    /// Verify the hash chain
    Verify,
    /// Drop history past its retention period
    Prune,
}

pub(crate) async fn handle(ctx: &CliContext, command: AuditCommands) -> anyhow::Result<Outcome> {
    let engine = ctx.engine()?;
    match command {
        AuditCommands::Show { request_id } => {
            let entries = engine.audit_entries(request_id).await?;
            if ctx.format().is_json() {
                print_json(&entries)?;
            } else {
                print_entries(&entries);
            }
            Ok(Outcome::Success)
        },
        AuditCommands::Verify => {
            let result = engine.verify_audit().await?;
            if ctx.format().is_json() {
                print_json(&result)?;
            } else {
                print_verification(&result);
            }
            Ok(Outcome::from_success(result.valid))
        },
        AuditCommands::Prune => {
            let report = engine.prune_history().await?;
            if ctx.format().is_json() {
                print_json(&report)?;
            } else {
                println!(
                    "{}",
                    Theme::success(&format!(
                        "Pruned {} audit entries, {} rate-limit records, {} rollback captures",
                        report.audit_entries, report.admissions, report.rollback_captures
                    ))
                );
            }
            Ok(Outcome::Success)
        },
    }
}

fn print_entries(entries: &[AuditEntry]) {
    if entries.is_empty() {
        println!("{}", Theme::info("No audit entries"));
        return;
    }

    println!("\n{}", Theme::header("Audit Entries"));
    println!(
        "{:>6} {:<20} {:<10} {}",
        "SEQ".dimmed(),
        "TIMESTAMP".dimmed(),
        "REQUEST".dimmed(),
        "ACTION".dimmed()
    );
    println!("{}", Theme::separator());

    for entry in entries {
        let request = entry
            .request_id
            .map_or_else(|| "-".to_string(), |id| id.short());
        println!(
            "{:>6} {:<20} {:<10} {}",
            entry.sequence,
            Theme::timestamp(&entry.timestamp),
            Theme::id(&request),
            entry.action.description()
        );
    }
    println!();
}

fn print_verification(result: &ChainVerificationResult) {
    if result.valid {
        println!(
            "{}",
            Theme::success(&format!(
                "Audit chain intact ({} entries verified)",
                result.entries_verified
            ))
        );
        return;
    }

    println!(
        "{}",
        Theme::error(&format!(
            "Audit chain broken: {} issue(s) in {} entries",
            result.issues.len(),
            result.entries_verified
        ))
    );
    for issue in &result.issues {
        println!("  {}", issue.to_string().red());
    }
}
