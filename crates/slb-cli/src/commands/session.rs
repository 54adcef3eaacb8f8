//! Session command - register, end and inspect agent sessions.

use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::json;

use slb_approval::RegisterSession;
use slb_core::{Session, SessionId};

use crate::context::CliContext;
use crate::theme::Theme;

#[derive(Debug, Subcommand)]
pub(crate) enum SessionCommands {
    /// Register a new session and print its id and key
    Start(StartArgs),
    /// End a session; its key stops working
    End(SessionArg),
    /// List sessions
    List {
        /// Include sessions from every project in the ledger
        #[arg(long)]
        all_projects: bool,
        /// Include ended sessions
        #[arg(long)]
        include_ended: bool,
    },
    /// Mark a session as still alive
    Heartbeat(SessionArg),
    /// Restart the per-minute request window for a session
    ResetLimits(SessionArg),
}

#[derive(Debug, Args)]
pub(crate) struct StartArgs {
    /// Agent name (e.g. "BlueLake")
    #[arg(short, long, env = "SLB_AGENT")]
    pub(crate) agent: String,

    /// Model identifier (e.g. "opus-4")
    #[arg(short, long)]
    pub(crate) model: String,

    /// Program hosting the agent
    #[arg(short, long, default_value = "unknown")]
    pub(crate) program: String,

    /// Register as a human reviewer
    #[arg(long)]
    pub(crate) human: bool,
}

#[derive(Debug, Args)]
pub(crate) struct SessionArg {
    /// Session ID
    #[arg(short, long, env = "SLB_SESSION_ID")]
    pub(crate) session_id: SessionId,
}

pub(crate) async fn handle(ctx: &CliContext, command: SessionCommands) -> anyhow::Result<()> {
    match command {
        SessionCommands::Start(args) => start(ctx, args).await,
        SessionCommands::End(arg) => {
            let session = ctx.engine()?.end_session(arg.session_id).await?;
            if ctx.format().is_json() {
                return crate::formatter::print_json(&session);
            }
            println!("{}", Theme::success(&format!("Ended session {}", session.id)));
            Ok(())
        },
        SessionCommands::List {
            all_projects,
            include_ended,
        } => {
            let project = (!all_projects).then(|| ctx.project.project().to_path_buf());
            let sessions = ctx.engine()?.list_sessions(project, !include_ended).await?;
            if ctx.format().is_json() {
                return crate::formatter::print_json(&sessions);
            }
            print_sessions(&sessions);
            Ok(())
        },
        SessionCommands::Heartbeat(arg) => {
            let session = ctx.engine()?.heartbeat(arg.session_id).await?;
            if ctx.format().is_json() {
                return crate::formatter::print_json(&session);
            }
            println!(
                "{}",
                Theme::success(&format!("Session {} active", session.id.short()))
            );
            Ok(())
        },
        SessionCommands::ResetLimits(arg) => {
            ctx.engine()?.reset_rate_limits(arg.session_id).await?;
            if ctx.format().is_json() {
                return crate::formatter::print_json(&json!({
                    "session_id": arg.session_id,
                    "rate_limits_reset": true,
                }));
            }
            println!(
                "{}",
                Theme::success(&format!("Rate limits reset for {}", arg.session_id.short()))
            );
            Ok(())
        },
    }
}

async fn start(ctx: &CliContext, args: StartArgs) -> anyhow::Result<()> {
    let registered = ctx
        .engine()?
        .start_session(RegisterSession {
            agent_name: args.agent,
            program: args.program,
            model: args.model,
            project_path: ctx.project.project().to_path_buf(),
            human: args.human,
        })
        .await?;
    let session = &registered.session;
    let key = registered.key.to_hex();

    if ctx.format().is_json() {
        return crate::formatter::print_json(&json!({
            "session_id": session.id,
            "session_key": key,
            "agent_name": session.agent_name,
            "model": session.model,
            "project_path": session.project_path,
            "human": session.human,
        }));
    }

    println!("{}", Theme::success(&format!("Session started for {}", session.agent_name)));
    println!("{}", Theme::kv("Session ID", &session.id.to_string()));
    println!("{}", Theme::kv("Session key", &key));
    println!();
    println!(
        "{}",
        Theme::dimmed("The key is shown once. Export both for later commands:")
    );
    println!("  export SLB_SESSION_ID={}", session.id);
    println!("  export SLB_SESSION_KEY={key}");
    Ok(())
}

fn print_sessions(sessions: &[Session]) {
    if sessions.is_empty() {
        println!("{}", Theme::info("No sessions found"));
        return;
    }

    println!("\n{}", Theme::header("Sessions"));
    println!(
        "{:<10} {:<16} {:<16} {:<20} {}",
        "ID".dimmed(),
        "AGENT".dimmed(),
        "MODEL".dimmed(),
        "LAST ACTIVE".dimmed(),
        "PROJECT".dimmed()
    );
    println!("{}", Theme::separator());

    for session in sessions {
        let mut agent = session.agent_name.clone();
        if session.human {
            agent.push_str(" (human)");
        }
        if session.ended_at.is_some() {
            agent.push_str(" [ended]");
        }
        println!(
            "{:<10} {:<16} {:<16} {:<20} {}",
            Theme::id(&session.id.short()),
            agent,
            session.model,
            Theme::timestamp(&session.last_active),
            session.project_path.display().to_string().dimmed()
        );
    }
    println!();
}
