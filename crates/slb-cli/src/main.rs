//! SLB CLI - a two-person rule for agent shell commands.
//!
//! Every invocation is a short-lived process over the project's ledger:
//! agents request approval with `run`, peers `approve` or `reject`, and the
//! approved command executes once its quorum holds.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod config_bridge;
mod context;
mod formatter;
mod theme;

use commands::audit::AuditCommands;
use commands::config::ConfigCommands;
use commands::escalate::EscalateArgs;
use commands::pending::PendingArgs;
use commands::review::{ApproveArgs, RejectArgs};
use commands::rollback::RollbackArgs;
use commands::run::{ExecuteArgs, RunArgs};
use commands::session::SessionCommands;
use commands::status::CancelArgs;
use commands::{audit, config, escalate, pending, review, rollback, run, session, status};
use context::{CliContext, GlobalArgs};
use formatter::{OutputFormat, Outcome};
use slb_core::RequestId;
use theme::Theme;

/// SLB - approval gate for risky shell commands
#[derive(Parser)]
#[command(name = "slb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,

    /// Shorthand for --format json
    #[arg(long, global = true)]
    json: bool,

    /// Project root (defaults to the nearest ancestor with .slb or .git)
    #[arg(long, global = true, env = "SLB_PROJECT")]
    project: Option<PathBuf>,

    /// Project config file, replacing <project>/.slb/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override a config value (e.g. --set general.request_timeout=600)
    #[arg(long = "set", global = true, value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn global_args(&self) -> GlobalArgs {
        GlobalArgs {
            format: if self.json {
                OutputFormat::Json
            } else {
                self.format
            },
            verbose: self.verbose,
            project: self.project.clone(),
            config: self.config.clone(),
            overrides: self.overrides.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Manage agent sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Request approval for a command, wait for review, then run it
    Run(RunArgs),

    /// Run a request that was approved after `run --yield`
    Execute(ExecuteArgs),

    /// Approve a pending request
    Approve(ApproveArgs),

    /// Reject a pending request
    Reject(RejectArgs),

    /// List requests awaiting review
    Pending(PendingArgs),

    /// Show a request with its reviews and execution result
    Status {
        /// Request ID
        request_id: RequestId,
    },

    /// Withdraw your own request
    Cancel(CancelArgs),

    /// Apply deadlines and approval expiry to every open request
    Escalate(EscalateArgs),

    /// Restore the snapshot taken before a request ran
    Rollback(RollbackArgs),

    /// View, verify and prune the audit trail
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

impl Commands {
    /// Name used in JSON error documents.
    fn name(&self) -> &'static str {
        match self {
            Self::Session { .. } => "session",
            Self::Run(_) => "run",
            Self::Execute(_) => "execute",
            Self::Approve(_) => "approve",
            Self::Reject(_) => "reject",
            Self::Pending(_) => "pending",
            Self::Status { .. } => "status",
            Self::Cancel(_) => "cancel",
            Self::Escalate(_) => "escalate",
            Self::Rollback(_) => "rollback",
            Self::Audit { .. } => "audit",
            Self::Config { .. } => "config",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let global = cli.global_args();
    let format = global.format;
    let verbose = global.verbose;
    let name = cli.command.name();

    let ctx = match CliContext::load(global) {
        Ok(ctx) => ctx,
        Err(e) => {
            if let Err(log_err) =
                slb_telemetry::setup_logging(&config_bridge::fallback_log_config(verbose))
            {
                eprintln!("Failed to initialize logging: {log_err}");
            }
            return report_error(format, name, &e.context("loading configuration"));
        },
    };

    // Set up logging from config, with --verbose override.
    let log_config = config_bridge::to_log_config(ctx.config(), verbose);
    if let Err(e) = slb_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match dispatch(&ctx, cli.command).await {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(Outcome::Failure) => ExitCode::FAILURE,
        Err(e) => report_error(format, name, &e),
    }
}

async fn dispatch(ctx: &CliContext, command: Commands) -> anyhow::Result<Outcome> {
    match command {
        Commands::Session { command } => session::handle(ctx, command).await?,
        Commands::Run(args) => return run::run(ctx, args).await,
        Commands::Execute(args) => return run::execute(ctx, args).await,
        Commands::Approve(args) => review::approve(ctx, args).await?,
        Commands::Reject(args) => review::reject(ctx, args).await?,
        Commands::Pending(args) => pending::pending(ctx, args).await?,
        Commands::Status { request_id } => status::status(ctx, request_id).await?,
        Commands::Cancel(args) => status::cancel(ctx, args).await?,
        Commands::Escalate(args) => escalate::escalate(ctx, args).await?,
        Commands::Rollback(args) => rollback::rollback(ctx, args).await?,
        Commands::Audit { command } => return audit::handle(ctx, command).await,
        Commands::Config { command } => config::handle(ctx, command)?,
    }
    Ok(Outcome::Success)
}

/// Print `err` in the selected format and map it to exit code 1.
fn report_error(format: OutputFormat, command: &str, err: &anyhow::Error) -> ExitCode {
    if format.is_json() {
        let doc = formatter::error_json(command, err);
        if let Err(e) = formatter::print_json(&doc) {
            eprintln!("{}", Theme::error(&format!("{err:#} (and writing JSON failed: {e})")));
        }
    } else {
        eprintln!("{}", Theme::error(&format!("{err:#}")));
    }
    ExitCode::FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use slb_core::Decision;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("slb").chain(args.iter().copied())).unwrap()
    }

    const REQ: &str = "6f1f9d1c-7a55-4c64-9a43-1d2b6b7f0c11";
    const SESS: &str = "0b0b6a3e-2f4c-4a8e-8f7e-5a3c9d2e1f00";

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_json_shorthand_selects_json() {
        let cli = parse(&["--json", "pending"]);
        assert_eq!(cli.global_args().format, OutputFormat::Json);
        let cli = parse(&["pending", "--format", "json"]);
        assert_eq!(cli.global_args().format, OutputFormat::Json);
        let cli = parse(&["pending"]);
        assert_eq!(cli.global_args().format, OutputFormat::Pretty);
    }

    #[test]
    fn test_run_flags() {
        let cli = parse(&[
            "run",
            "rm -rf ./build",
            "--session-id",
            SESS,
            "--reason",
            "Clean build artifacts",
            "--timeout",
            "60",
            "--yield",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.command, "rm -rf ./build");
        assert_eq!(args.session_id.to_string(), SESS);
        assert_eq!(args.reason, "Clean build artifacts");
        assert_eq!(args.timeout, 60);
        assert!(args.yield_);
        assert!(!args.no_rollback);
    }

    #[test]
    fn test_reject_flags() {
        let cli = parse(&[
            "reject",
            REQ,
            "-s",
            SESS,
            "-k",
            "deadbeef",
            "-r",
            "Command too dangerous",
            "-m",
            "try --dry-run",
            "--target-project",
            "/work/other",
        ]);
        let Commands::Reject(args) = cli.command else {
            panic!("expected reject");
        };
        assert_eq!(args.reviewer.request_id.to_string(), REQ);
        assert_eq!(args.reviewer.session_key, "deadbeef");
        assert_eq!(args.reason, "Command too dangerous");
        assert_eq!(
            args.reviewer.target_project.as_deref(),
            Some(std::path::Path::new("/work/other"))
        );
        assert_eq!(
            review::compose_comments(&args.reason, &args.reviewer.comments),
            "Command too dangerous\n\ntry --dry-run"
        );
        assert_eq!(Decision::Reject.as_str(), "reject");
    }

    #[test]
    fn test_pending_flags() {
        let cli = parse(&["pending", "--session-id", SESS, "--review-pool", "--all-projects"]);
        let Commands::Pending(args) = cli.command else {
            panic!("expected pending");
        };
        assert!(args.review_pool);
        assert!(args.all_projects);
        assert!(args.session_id.is_some());
    }

    #[test]
    fn test_bad_request_id_is_rejected_by_parser() {
        assert!(Cli::try_parse_from(["slb", "status", "not-a-uuid"]).is_err());
    }

    #[test]
    fn test_request_id_accepts_display_prefix() {
        let cli = parse(&["status", &format!("req:{REQ}")]);
        let Commands::Status { request_id } = cli.command else {
            panic!("expected status");
        };
        assert_eq!(request_id.to_string(), REQ);
    }

    #[test]
    fn test_overrides_are_collected() {
        let cli = parse(&[
            "--set",
            "general.request_timeout=600",
            "config",
            "show",
            "--set",
            "rate_limits.max_pending_per_session=2",
        ]);
        assert_eq!(
            cli.global_args().overrides,
            vec![
                "general.request_timeout=600".to_string(),
                "rate_limits.max_pending_per_session=2".to_string()
            ]
        );
        assert_eq!(cli.command.name(), "config");
    }
}
