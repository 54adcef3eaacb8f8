//! Escalate command - apply deadlines and approval expiry across the ledger.

use std::time::Duration;

use clap::Args;
use tracing::{info, warn};

use slb_approval::{ApprovalEngine, EscalationEvent, EscalationReport};

use crate::context::CliContext;
use crate::formatter::print_json;
use crate::theme::Theme;

#[derive(Debug, Args)]
pub(crate) struct EscalateArgs {
    /// Keep running, sweeping every --interval seconds until interrupted
    #[arg(long)]
    pub(crate) watch: bool,

    /// Seconds between sweeps in --watch mode
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub(crate) interval: u64,
}

pub(crate) async fn escalate(ctx: &CliContext, args: EscalateArgs) -> anyhow::Result<()> {
    let engine = ctx.engine()?;
    if !args.watch {
        let report = engine.escalate().await?;
        if ctx.format().is_json() {
            return print_json(&report);
        }
        print_report(&report);
        return Ok(());
    }
    watch(ctx, &engine, Duration::from_secs(args.interval)).await
}

async fn watch(ctx: &CliContext, engine: &ApprovalEngine, interval: Duration) -> anyhow::Result<()> {
    info!(interval_secs = interval.as_secs(), "Escalation watch started");
    if !ctx.format().is_json() {
        println!(
            "{}",
            Theme::info(&format!(
                "Sweeping every {}s (Ctrl-C to stop)",
                interval.as_secs()
            ))
        );
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    warn!(error = %e, "Signal handler failed; stopping watch");
                }
                break;
            },
            _ = ticker.tick() => {
                // A failed sweep is retried on the next tick.
                match engine.escalate().await {
                    Ok(report) if report.events.is_empty() => {},
                    Ok(report) => {
                        if ctx.format().is_json() {
                            print_json(&report)?;
                        } else {
                            print_events(&report.events);
                        }
                    },
                    Err(e) => warn!(error = %e, "Escalation sweep failed"),
                }
            },
        }
    }
    info!("Escalation watch stopped");
    Ok(())
}

fn print_report(report: &EscalationReport) {
    if report.events.is_empty() {
        println!(
            "{}",
            Theme::info(&format!("Examined {} requests; nothing due", report.examined))
        );
        return;
    }
    println!(
        "{}",
        Theme::header(&format!(
            "Examined {} requests, {} changed",
            report.examined,
            report.events.len()
        ))
    );
    print_events(&report.events);
}

fn print_events(events: &[EscalationEvent]) {
    for event in events {
        println!("  {}", describe(event));
    }
}

fn describe(event: &EscalationEvent) -> String {
    let id = event.request_id().short();
    match event {
        EscalationEvent::Escalated { deadline, .. } => {
            format!("{} escalated; new deadline {}", Theme::id(&id), Theme::timestamp(deadline))
        },
        EscalationEvent::TimedOut { action, status, .. } => {
            format!("{} timed out ({action}) -> {}", Theme::id(&id), Theme::status(*status))
        },
        EscalationEvent::ApprovalExpired { .. } => {
            format!("{} approval expired; back to review", Theme::id(&id))
        },
        EscalationEvent::AutoApproved { .. } => {
            format!("{} auto-approved after its review window", Theme::id(&id))
        },
        EscalationEvent::Resolved { status, .. } => {
            format!("{} resolved -> {}", Theme::id(&id), Theme::status(*status))
        },
    }
}
