//! Post-merge configuration validation.
//!
//! Validates that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges and that every pattern compiles.

use regex::Regex;
use slb_core::RiskTier;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_general(config)?;
    validate_patterns(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_general(config: &Config) -> ConfigResult<()> {
    let g = &config.general;

    if g.request_timeout == 0 {
        return Err(invalid("general.request_timeout", "must be > 0 seconds"));
    }
    if g.approval_ttl_minutes == 0 {
        return Err(invalid("general.approval_ttl_minutes", "must be > 0"));
    }
    if g.approval_ttl_critical_minutes == 0 {
        return Err(invalid("general.approval_ttl_critical_minutes", "must be > 0"));
    }
    if !(g.dynamic_quorum_fraction.is_finite()
        && g.dynamic_quorum_fraction > 0.0
        && g.dynamic_quorum_fraction <= 1.0)
    {
        return Err(invalid(
            "general.dynamic_quorum_fraction",
            format!("{} is out of range; must be in (0, 1]", g.dynamic_quorum_fraction),
        ));
    }
    if g.default_tier == RiskTier::Safe {
        tracing::warn!("general.default_tier is 'safe'; unmatched commands will run without review");
    }
    Ok(())
}

fn validate_patterns(config: &Config) -> ConfigResult<()> {
    for tier in RiskTier::PRIORITY {
        let t = config.patterns.tier(tier);
        let prefix = format!("patterns.{tier}");
        if t.dynamic_quorum && t.dynamic_quorum_floor > t.min_approvals {
            return Err(invalid(
                &format!("{prefix}.dynamic_quorum_floor"),
                format!(
                    "floor ({}) must not exceed min_approvals ({})",
                    t.dynamic_quorum_floor, t.min_approvals
                ),
            ));
        }
        for (i, pattern) in t.patterns.iter().enumerate() {
            if let Err(e) = Regex::new(pattern) {
                return Err(invalid(
                    &format!("{prefix}.patterns[{i}]"),
                    format!("invalid regular expression {pattern:?}: {e}"),
                ));
            }
        }
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !matches!(
        l.level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(invalid(
            "logging.level",
            format!("unknown level '{}'; expected trace|debug|info|warn|error", l.level),
        ));
    }
    if !matches!(l.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(invalid(
            "logging.format",
            format!("unknown format '{}'; expected pretty|compact|json|full", l.format),
        ));
    }
    Ok(())
}
