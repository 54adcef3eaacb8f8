//! Output modes and the JSON shapes shared by every command.

use std::io::{self, Write};

use clap::ValueEnum;
use serde::Serialize;
use serde_json::{Value, json};

use slb_approval::ApprovalError;

/// Output format mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Styled text for people.
    #[default]
    Pretty,
    /// One JSON document on stdout.
    Json,
}

impl OutputFormat {
    pub(crate) fn is_json(self) -> bool {
        self == Self::Json
    }
}

/// How a command ended, independent of whether it errored.
///
/// A rejected request or a failed execution is reported normally on stdout
/// and still exits 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub(crate) enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub(crate) fn from_success(ok: bool) -> Self {
        if ok { Self::Success } else { Self::Failure }
    }
}

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

/// Stable error kind for `err`; engine errors carry their own taxonomy.
pub(crate) fn error_kind(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<ApprovalError>()
        .map_or("error", ApprovalError::kind)
}

/// The JSON document emitted in place of a result when a command fails.
pub(crate) fn error_json(command: &str, err: &anyhow::Error) -> Value {
    json!({
        "status": error_kind(err),
        "command": command,
        "error": format!("{err:#}"),
    })
}
