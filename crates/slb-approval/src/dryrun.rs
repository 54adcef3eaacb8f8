//! Non-destructive preview variants of supported commands.
//!
//! The preview is recorded on the request for reviewers; it is never run by
//! the engine itself.

use crate::normalize::{normalize, tokenize};

/// Characters that force a token to be single-quoted.
const SHELL_SPECIAL: &str = " \t\r\n'\"\\$&;|<>*?()[]{}";

/// A shell-safe preview of `command`, or `None` when no preview exists.
#[must_use]
pub fn dry_run_command(command: &str) -> Option<String> {
    dry_run_tokens(command).map(|tokens| shell_join(&tokens))
}

fn dry_run_tokens(command: &str) -> Option<Vec<String>> {
    let mut tokens = normalize(command).primary_tokens;
    if tokens.is_empty() {
        tokens = tokenize(command.trim()).ok()?;
    }
    match tokens.first().map(String::as_str)? {
        "kubectl" => kubectl(tokens),
        "terraform" => terraform(&tokens),
        "rm" => rm(&tokens),
        "git" => git(&tokens),
        "helm" => helm(&tokens),
        _ => None,
    }
}

fn kubectl(mut tokens: Vec<String>) -> Option<Vec<String>> {
    if tokens.get(1).map(String::as_str) != Some("delete") {
        return None;
    }
    if tokens.iter().any(|t| t.starts_with("--dry-run")) {
        return Some(tokens);
    }
    tokens.push("--dry-run=client".into());
    if !tokens.iter().any(|t| t == "-o" || t.starts_with("--output")) {
        tokens.push("-o".into());
        tokens.push("yaml".into());
    }
    Some(tokens)
}

fn terraform(tokens: &[String]) -> Option<Vec<String>> {
    if tokens.get(1).map(String::as_str) != Some("destroy") {
        return None;
    }
    let mut out: Vec<String> = vec!["terraform".into(), "plan".into(), "-destroy".into()];
    out.extend(tokens.iter().skip(2).cloned());
    Some(out)
}

fn rm(tokens: &[String]) -> Option<Vec<String>> {
    let targets = rm_targets(tokens.get(1..)?);
    if targets.is_empty() {
        return None;
    }
    let mut out: Vec<String> = vec!["ls".into(), "-la".into(), "--".into()];
    out.extend(targets);
    Some(out)
}

fn git(tokens: &[String]) -> Option<Vec<String>> {
    if tokens.get(1).map(String::as_str) != Some("reset") {
        return None;
    }
    let target = tokens.iter().skip(2).find(|t| !t.starts_with('-'))?;
    Some(vec!["git".into(), "diff".into(), format!("{target}..HEAD")])
}

fn helm(tokens: &[String]) -> Option<Vec<String>> {
    if tokens.get(1).map(String::as_str) != Some("uninstall") {
        return None;
    }
    let release = tokens.get(2)?;
    Some(vec![
        "helm".into(),
        "get".into(),
        "manifest".into(),
        release.clone(),
    ])
}

/// Path arguments of an `rm` invocation: everything but flags, and
/// everything after `--`.
pub(crate) fn rm_targets(args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut after_dashdash = false;
    for arg in args {
        if arg == "--" && !after_dashdash {
            after_dashdash = true;
            continue;
        }
        if !after_dashdash && arg.starts_with('-') {
            continue;
        }
        out.push(arg.clone());
    }
    out
}

/// Quote one token for POSIX shells.
#[must_use]
pub fn shell_quote(token: &str) -> String {
    if token.is_empty() {
        return "''".to_string();
    }
    if !token.chars().any(|c| SHELL_SPECIAL.contains(c)) {
        return token.to_string();
    }
    format!("'{}'", token.replace('\'', r"'\''"))
}

fn shell_join(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| shell_quote(t))
        .collect::<Vec<_>>()
        .join(" ")
}
