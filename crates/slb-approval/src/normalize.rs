//! Command normalization: the classifier's view of a shell command line.
//!
//! A command such as `sudo env FOO=1 bash -c 'cd /tmp && rm -rf build'` is
//! reduced to the segments `cd /tmp` and `rm -rf build`. Every segment is
//! classified on its own and the most severe tier wins, so wrapping a
//! destructive command in `sudo`, a shell, or a pipeline cannot hide it.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Nesting limit for `sh -c '...'` unwrapping.
const MAX_SHELL_DEPTH: usize = 8;

static SHELL_C: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(bash|sh|zsh|ksh|dash)\s+-c\s+['"](.+)['"]$"#).expect("invalid regex")
});
static SUBSHELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\([^)]+\)|`[^`]+`|\([^)]+\)").expect("invalid regex")
});
static ENV_ASSIGN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").expect("invalid regex"));

/// Prefix commands that run their arguments as another command.
const WRAPPERS: &[&str] = &[
    "sudo", "doas", "env", "command", "builtin", "time", "nice", "ionice", "nohup", "strace",
    "ltrace",
];

/// Wrapper flags that consume the following token as their value.
fn flag_takes_value(wrapper: &str, flag: &str) -> bool {
    match wrapper {
        "sudo" => matches!(flag, "-u" | "-g" | "-C" | "-p" | "-D" | "-r" | "-t" | "-U"),
        "doas" => matches!(flag, "-u" | "-C"),
        "env" => matches!(flag, "-u" | "-C" | "-S"),
        "nice" => flag == "-n",
        "ionice" => matches!(flag, "-c" | "-n" | "-p"),
        "time" => matches!(flag, "-f" | "-o"),
        "strace" | "ltrace" => matches!(flag, "-o" | "-e" | "-p" | "-s" | "-u"),
        _ => false,
    }
}

/// A command line broken into classifiable segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizedCommand {
    /// The input, untouched.
    pub original: String,
    /// First segment, empty for a blank command.
    pub primary: String,
    /// Words of the first segment, quoting resolved.
    pub primary_tokens: Vec<String>,
    /// Every simple command, wrappers stripped, in order of appearance.
    pub segments: Vec<String>,
    /// Whether the line chains or pipes several commands.
    pub is_compound: bool,
    /// Whether the line contains `$(...)`, backticks or a parenthesised group.
    pub has_subshell: bool,
    /// Wrapper commands that were stripped, e.g. `sudo`, `bash -c`.
    pub stripped_wrappers: Vec<String>,
    /// Whether some segment had unbalanced quotes or a dangling escape.
    pub parse_error: bool,
}

impl NormalizedCommand {
    /// Whether classification should distrust the segments it was given.
    #[must_use]
    pub fn is_opaque(&self) -> bool {
        self.has_subshell || self.parse_error
    }
}

/// Normalize `command` for classification.
#[must_use]
pub fn normalize(command: &str) -> NormalizedCommand {
    let mut out = NormalizedCommand {
        original: command.to_string(),
        ..NormalizedCommand::default()
    };
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return out;
    }
    out.has_subshell = SUBSHELL.is_match(trimmed);
    collect_segments(trimmed, 0, &mut out);
    if let Some(first) = out.segments.first() {
        out.primary = first.clone();
    }
    out
}

fn collect_segments(line: &str, depth: usize, out: &mut NormalizedCommand) {
    let pieces = split_compound(line);
    if pieces.len() > 1 {
        out.is_compound = true;
    }
    for piece in pieces {
        if depth < MAX_SHELL_DEPTH {
            if let Some(caps) = SHELL_C.captures(&piece) {
                out.stripped_wrappers.push(format!("{} -c", &caps[1]));
                collect_segments(&caps[2], depth.saturating_add(1), out);
                continue;
            }
        }
        let (tokens, parse_error) = match tokenize(&piece) {
            Ok(tokens) => (tokens, false),
            Err(()) => (piece.split_whitespace().map(str::to_string).collect(), true),
        };
        out.parse_error |= parse_error;
        let rest = strip_wrappers(&tokens, &mut out.stripped_wrappers);
        if rest.is_empty() {
            continue;
        }
        // A wrapper may itself be wrapping a shell: `sudo sh -c '...'`.
        if depth < MAX_SHELL_DEPTH && is_shell_c(rest) {
            out.stripped_wrappers.push(format!("{} -c", rest[0]));
            collect_segments(&rest[2..].join(" "), depth.saturating_add(1), out);
            continue;
        }
        if out.segments.is_empty() {
            out.primary_tokens = rest.to_vec();
        }
        out.segments.push(rest.join(" "));
    }
}

fn is_shell_c(tokens: &[String]) -> bool {
    tokens.len() >= 3
        && matches!(tokens[0].as_str(), "bash" | "sh" | "zsh" | "ksh" | "dash")
        && tokens[1] == "-c"
}

/// Drop leading wrapper commands (and their flags / `VAR=value` arguments).
fn strip_wrappers<'a>(tokens: &'a [String], stripped: &mut Vec<String>) -> &'a [String] {
    let mut i = 0;
    while let Some(tok) = tokens.get(i) {
        if !WRAPPERS.contains(&tok.as_str()) {
            break;
        }
        let wrapper = tok.as_str();
        stripped.push(wrapper.to_string());
        i = i.saturating_add(1);
        while let Some(next) = tokens.get(i) {
            if next == "--" {
                i = i.saturating_add(1);
                break;
            }
            if next.starts_with('-') && next.len() > 1 {
                i = i.saturating_add(if flag_takes_value(wrapper, next) { 2 } else { 1 });
                continue;
            }
            if wrapper == "env" && ENV_ASSIGN.is_match(next) {
                i = i.saturating_add(1);
                continue;
            }
            break;
        }
    }
    tokens.get(i..).unwrap_or(&[])
}

/// Split on `;`, `&&`, `||`, `&` and `|` outside quotes.
///
/// Redirections such as `2>&1` and `&>` are not separators.
pub(crate) fn split_compound(line: &str) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    let mut i = 0;

    let mut flush = |current: &mut String| {
        let seg = current.trim();
        if !seg.is_empty() {
            segments.push(seg.to_string());
        }
        current.clear();
    };

    while let Some(&c) = chars.get(i) {
        i = i.saturating_add(1);
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if !in_single => {
                current.push(c);
                escaped = true;
            },
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(c);
            },
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
            },
            '&' | '|' | ';' if !in_single && !in_double => {
                let next = chars.get(i).copied();
                let prev = current.chars().last();
                if c == '&' && (matches!(prev, Some('>' | '<')) || next == Some('>')) {
                    current.push(c);
                    continue;
                }
                if (c == '&' || c == '|') && next == Some(c) {
                    i = i.saturating_add(1);
                }
                flush(&mut current);
            },
            _ => current.push(c),
        }
    }
    flush(&mut current);
    segments
}

/// Split a simple command into words, honouring quotes and backslashes.
///
/// Returns `Err(())` on an unterminated quote or a trailing backslash; the
/// caller falls back to whitespace splitting and flags the parse error.
pub(crate) fn tokenize(input: &str) -> Result<Vec<String>, ()> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(()),
                    }
                }
            },
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            },
                            None => return Err(()),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(()),
                    }
                }
            },
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(ch) => current.push(ch),
                    None => return Err(()),
                }
            },
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            },
            c => {
                in_token = true;
                current.push(c);
            },
        }
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
