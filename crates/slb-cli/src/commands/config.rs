//! Config command - show the effective configuration and where it came from.

use clap::Subcommand;
use colored::Colorize;
use serde_json::json;

use slb_config::ResolvedConfig;

use crate::context::CliContext;
use crate::formatter::print_json;
use crate::theme::Theme;

#[derive(Debug, Subcommand)]
pub(crate) enum ConfigCommands {
    /// Print the effective configuration
    Show {
        /// Only this top-level section (e.g. "general", "rate_limits")
        #[arg(short, long)]
        section: Option<String>,
    },
    /// Print which layer supplied each setting
    Sources,
    /// Print the files and ledger in use
    Paths,
}

pub(crate) fn handle(ctx: &CliContext, command: ConfigCommands) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Show { section } => show(ctx, section.as_deref()),
        ConfigCommands::Sources => sources(ctx),
        ConfigCommands::Paths => paths(ctx),
    }
}

fn show(ctx: &CliContext, section: Option<&str>) -> anyhow::Result<()> {
    let value = select_section(&ctx.resolved, section)?;
    if ctx.format().is_json() {
        return print_json(&value);
    }
    print!("{}", toml::to_string_pretty(&value)?);
    Ok(())
}

/// The whole configuration, or one top-level table of it.
fn select_section(resolved: &ResolvedConfig, section: Option<&str>) -> anyhow::Result<toml::Value> {
    let value = toml::Value::try_from(&resolved.config)?;
    let Some(name) = section else {
        return Ok(value);
    };
    match value.get(name) {
        Some(toml::Value::Table(table)) => {
            let mut wrapped = toml::map::Map::new();
            wrapped.insert(name.to_string(), toml::Value::Table(table.clone()));
            Ok(toml::Value::Table(wrapped))
        },
        Some(other) => Ok(other.clone()),
        None => anyhow::bail!(slb_approval::ApprovalError::Validation(format!(
            "unknown config section: {name}"
        ))),
    }
}

fn sources(ctx: &CliContext) -> anyhow::Result<()> {
    let rows = ctx.resolved.sources_table();
    if ctx.format().is_json() {
        let map: serde_json::Map<String, serde_json::Value> = rows
            .into_iter()
            .map(|(field, layer)| (field, json!(layer)))
            .collect();
        return print_json(&json!({
            "loaded_files": ctx.resolved.loaded_files,
            "fields": map,
        }));
    }

    println!("\n{}", Theme::header("Configuration Sources"));
    for file in &ctx.resolved.loaded_files {
        println!("{}", Theme::kv("File", file));
    }
    println!("{}", Theme::separator());
    for (field, layer) in rows {
        println!("{:<48} {}", field, layer.dimmed());
    }
    println!();
    Ok(())
}

fn paths(ctx: &CliContext) -> anyhow::Result<()> {
    let project = ctx.project.project().display().to_string();
    let state = ctx.project.state_dir().display().to_string();
    let database = ctx.database_path().display().to_string();
    let logs = ctx.project.logs_dir().display().to_string();
    let rollback = ctx.project.rollback_dir().display().to_string();

    if ctx.format().is_json() {
        return print_json(&json!({
            "project": project,
            "state_dir": state,
            "database": database,
            "logs": logs,
            "rollback": rollback,
            "loaded_files": ctx.resolved.loaded_files,
        }));
    }
    println!("{}", Theme::kv("Project", &project));
    println!("{}", Theme::kv("State", &state));
    println!("{}", Theme::kv("Database", &database));
    println!("{}", Theme::kv("Logs", &logs));
    println!("{}", Theme::kv("Rollback", &rollback));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use slb_config::{Config, FieldSources};

    fn resolved() -> ResolvedConfig {
        ResolvedConfig {
            config: Config::builtin().unwrap(),
            field_sources: FieldSources::new(),
            loaded_files: Vec::new(),
        }
    }

    #[test]
    fn test_select_whole_config() {
        let value = select_section(&resolved(), None).unwrap();
        assert!(value.get("general").is_some());
        assert!(value.get("rate_limits").is_some());
    }

    #[test]
    fn test_select_one_section_keeps_its_header() {
        let value = select_section(&resolved(), Some("rate_limits")).unwrap();
        let table = value.as_table().unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(
            value["rate_limits"]["max_requests_per_minute"].as_integer(),
            Some(10)
        );
    }

    #[test]
    fn test_unknown_section_is_a_validation_error() {
        let err = select_section(&resolved(), Some("nope")).unwrap_err();
        assert_eq!(crate::formatter::error_kind(&err), "validation_error");
    }
}
