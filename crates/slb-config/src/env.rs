//! `SLB_*` environment overrides and `key=value` flag overrides.
//!
//! Both layers carry raw strings. Each value is coerced to the TOML type of
//! the field it replaces in the defaults tree, so `SLB_REQUEST_TIMEOUT=60`
//! becomes an integer and `SLB_BLOCKED_AGENTS=a,b` becomes an array.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, get_path, set_path};

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "SLB_REQUIRE_DIFFERENT_MODEL",
        field_path: "general.require_different_model",
    },
    EnvMapping {
        var_name: "SLB_DIFFERENT_MODEL_TIMEOUT",
        field_path: "general.different_model_timeout",
    },
    EnvMapping {
        var_name: "SLB_CONFLICT_RESOLUTION",
        field_path: "general.conflict_resolution",
    },
    EnvMapping {
        var_name: "SLB_REQUEST_TIMEOUT",
        field_path: "general.request_timeout",
    },
    EnvMapping {
        var_name: "SLB_APPROVAL_TTL_MINUTES",
        field_path: "general.approval_ttl_minutes",
    },
    EnvMapping {
        var_name: "SLB_APPROVAL_TTL_CRITICAL_MINUTES",
        field_path: "general.approval_ttl_critical_minutes",
    },
    EnvMapping {
        var_name: "SLB_TIMEOUT_ACTION",
        field_path: "general.timeout_action",
    },
    EnvMapping {
        var_name: "SLB_ENABLE_DRY_RUN",
        field_path: "general.enable_dry_run",
    },
    EnvMapping {
        var_name: "SLB_ENABLE_ROLLBACK_CAPTURE",
        field_path: "general.enable_rollback_capture",
    },
    EnvMapping {
        var_name: "SLB_MAX_ROLLBACK_SIZE_MB",
        field_path: "general.max_rollback_size_mb",
    },
    EnvMapping {
        var_name: "SLB_CROSS_PROJECT_REVIEWS",
        field_path: "general.cross_project_reviews",
    },
    EnvMapping {
        var_name: "SLB_REVIEW_POOL",
        field_path: "general.review_pool",
    },
    EnvMapping {
        var_name: "SLB_DEFAULT_TIER",
        field_path: "general.default_tier",
    },
    EnvMapping {
        var_name: "SLB_MAX_PENDING_PER_SESSION",
        field_path: "rate_limits.max_pending_per_session",
    },
    EnvMapping {
        var_name: "SLB_MAX_REQUESTS_PER_MINUTE",
        field_path: "rate_limits.max_requests_per_minute",
    },
    EnvMapping {
        var_name: "SLB_RATE_LIMIT_ACTION",
        field_path: "rate_limits.rate_limit_action",
    },
    EnvMapping {
        var_name: "SLB_HISTORY_DB_PATH",
        field_path: "history.database_path",
    },
    EnvMapping {
        var_name: "SLB_HISTORY_RETENTION_DAYS",
        field_path: "history.retention_days",
    },
    EnvMapping {
        var_name: "SLB_TRUSTED_SELF_APPROVE",
        field_path: "agents.trusted_self_approve",
    },
    EnvMapping {
        var_name: "SLB_TRUSTED_SELF_APPROVE_DELAY_SECONDS",
        field_path: "agents.trusted_self_approve_delay_seconds",
    },
    EnvMapping {
        var_name: "SLB_BLOCKED_AGENTS",
        field_path: "agents.blocked",
    },
    EnvMapping {
        var_name: "SLB_HUMAN_AGENTS",
        field_path: "agents.human",
    },
    EnvMapping {
        var_name: "SLB_LOG_LEVEL",
        field_path: "logging.level",
    },
    EnvMapping {
        var_name: "SLB_LOG_FORMAT",
        field_path: "logging.format",
    },
];

/// Snapshot `SLB_*` variables from the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("SLB_"))
        .collect()
}

/// Apply every mapped, non-empty environment variable over `merged`.
///
/// Returns the number of variables applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] if a value cannot be coerced.
pub fn apply_env_overrides<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut count: usize = 0;
    for mapping in ENV_MAPPINGS {
        let Some(raw) = env_vars.get(mapping.var_name).filter(|v| !v.is_empty()) else {
            continue;
        };
        let value = coerce(merged, mapping.field_path, raw).map_err(|message| {
            ConfigError::EnvError {
                var_name: mapping.var_name.to_owned(),
                message,
            }
        })?;
        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env override"
        );
        set_path(merged, mapping.field_path, value);
        sources.insert(mapping.field_path.to_owned(), ConfigLayer::Environment);
        count = count.saturating_add(1);
    }
    Ok(count)
}

/// Apply `key=value` overrides from the command line.
///
/// # Errors
///
/// Returns [`ConfigError::OverrideError`] for a missing `=`, an unknown key,
/// or a value of the wrong type.
pub fn apply_flag_overrides(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    overrides: &[String],
) -> ConfigResult<()> {
    for entry in overrides {
        let Some((key, raw)) = entry.split_once('=') else {
            return Err(ConfigError::OverrideError {
                key: entry.clone(),
                message: "expected key=value".to_owned(),
            });
        };
        let key = key.trim();
        if get_path(merged, key).is_none() {
            return Err(ConfigError::OverrideError {
                key: key.to_owned(),
                message: "unknown configuration key".to_owned(),
            });
        }
        let value = coerce(merged, key, raw.trim()).map_err(|message| ConfigError::OverrideError {
            key: key.to_owned(),
            message,
        })?;
        set_path(merged, key, value);
        sources.insert(key.to_owned(), ConfigLayer::Flag);
    }
    Ok(())
}

/// Coerce `raw` to the type of the existing value at `path`.
fn coerce(root: &toml::Value, path: &str, raw: &str) -> Result<toml::Value, String> {
    match get_path(root, path) {
        Some(toml::Value::Integer(_)) => raw
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|_| format!("expected integer, got {raw:?}")),
        Some(toml::Value::Float(_)) => raw
            .parse::<f64>()
            .map(toml::Value::Float)
            .map_err(|_| format!("expected number, got {raw:?}")),
        Some(toml::Value::Boolean(_)) => parse_bool(raw)
            .map(toml::Value::Boolean)
            .ok_or_else(|| format!("expected boolean, got {raw:?}")),
        Some(toml::Value::Array(_)) => Ok(toml::Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| toml::Value::String(s.to_owned()))
                .collect(),
        )),
        _ => Ok(toml::Value::String(raw.to_owned())),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
