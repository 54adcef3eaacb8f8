//! CLI theme and styling.

use colored::Colorize;
use slb_core::{Decision, RequestStatus, RiskTier, Timestamp};

/// CLI theme configuration.
pub(crate) struct Theme;

impl Theme {
    /// Format a header.
    pub(crate) fn header(text: &str) -> String {
        format!("{}", text.bold().cyan())
    }

    /// Format a success message.
    pub(crate) fn success(text: &str) -> String {
        format!("{} {}", "✓".green(), text)
    }

    /// Format an error message.
    pub(crate) fn error(text: &str) -> String {
        format!("{} {}", "✗".red(), text.red())
    }

    /// Format a warning message.
    pub(crate) fn warning(text: &str) -> String {
        format!("{} {}", "!".yellow(), text.yellow())
    }

    /// Format an info message.
    pub(crate) fn info(text: &str) -> String {
        format!("{} {}", "i".blue(), text)
    }

    /// Format a dimmed message.
    pub(crate) fn dimmed(text: &str) -> String {
        format!("{}", text.dimmed())
    }

    /// Format a separator line.
    pub(crate) fn separator() -> String {
        "━".repeat(50).dimmed().to_string()
    }

    /// Format a key-value pair.
    pub(crate) fn kv(key: &str, value: &str) -> String {
        format!("  {:<16} {}", format!("{key}:").bold(), value)
    }

    /// Format a risk tier.
    pub(crate) fn tier(tier: RiskTier) -> String {
        match tier {
            RiskTier::Safe => "SAFE".green().to_string(),
            RiskTier::Caution => "CAUTION".yellow().to_string(),
            RiskTier::Dangerous => "DANGEROUS".red().to_string(),
            RiskTier::Critical => "CRITICAL".red().bold().to_string(),
        }
    }

    /// Format a request status.
    pub(crate) fn status(status: RequestStatus) -> String {
        let text = status.as_str();
        match status {
            RequestStatus::Pending | RequestStatus::Executing => text.yellow().to_string(),
            RequestStatus::Approved | RequestStatus::Executed => text.green().to_string(),
            RequestStatus::Rejected | RequestStatus::ExecutionFailed => text.red().to_string(),
            RequestStatus::Cancelled | RequestStatus::Timeout => text.dimmed().to_string(),
        }
    }

    /// Format a review decision.
    pub(crate) fn decision(decision: Decision) -> String {
        match decision {
            Decision::Approve => "approve".green().to_string(),
            Decision::Reject => "reject".red().to_string(),
        }
    }

    /// Format an identifier (shortened).
    pub(crate) fn id(short: &str) -> String {
        format!("{}", short.cyan())
    }

    /// Format a timestamp.
    pub(crate) fn timestamp(ts: &Timestamp) -> String {
        ts.into_inner()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
            .to_string()
    }
}
