//! Config file discovery and layered loading.
//!
//! Implements the load algorithm:
//! 1. Parse embedded `defaults.toml` → base
//! 2. Merge `~/.slb/config.toml` (user)
//! 3. Merge `<project>/.slb/config.toml` or an explicit `--config` path (project)
//! 4. Apply `SLB_*` environment overrides
//! 5. Apply `key=value` flag overrides
//! 6. Deserialize the merged tree → [`Config`]
//! 7. Validate and return an immutable [`ResolvedConfig`]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::env::{apply_env_overrides, apply_flag_overrides, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, record_leaves};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Inputs to [`load`]. Passed by value; nothing here is global.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Project root used to find `.slb/config.toml`. Skipped when `None`.
    pub project_dir: Option<PathBuf>,
    /// Explicit project config file, replacing the discovered one.
    pub config_path: Option<PathBuf>,
    /// User-level `.slb` directory, replacing `$SLB_HOME` / `~/.slb`.
    pub home_dir: Option<PathBuf>,
    /// Highest-precedence `key=value` overrides.
    pub overrides: Vec<String>,
    /// Environment snapshot. `None` reads the process environment.
    pub env: Option<HashMap<String, String>>,
}

/// The effective configuration plus where each value came from.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// The validated configuration.
    pub config: Config,
    /// Dotted field path → layer that set it.
    #[serde(skip)]
    pub field_sources: FieldSources,
    /// Files merged, lowest precedence first.
    pub loaded_files: Vec<String>,
}

impl ResolvedConfig {
    /// Rows of `(field, layer)` for display, sorted by field.
    #[must_use]
    pub fn sources_table(&self) -> Vec<(String, String)> {
        self.field_sources
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }
}

impl Config {
    /// The built-in defaults with no other layers applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] if the embedded defaults are malformed.
    pub fn builtin() -> ConfigResult<Self> {
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })
    }
}

/// Load the configuration with full layer precedence.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any file is malformed, an override cannot be
/// coerced, or the merged configuration fails validation.
pub fn load(opts: LoadOptions) -> ConfigResult<ResolvedConfig> {
    let env_vars = opts.env.unwrap_or_else(collect_env_vars);

    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;
    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", ConfigLayer::Defaults, &mut field_sources);

    // User layer.
    if let Some(home) = user_dir(opts.home_dir, &env_vars) {
        let path = home.join("config.toml");
        if let Some(overlay) = try_load_file(&path)? {
            deep_merge_tracking(&mut merged, &overlay, "", ConfigLayer::User, &mut field_sources);
            info!(path = %path.display(), "loaded user config");
            loaded_files.push(path.display().to_string());
        }
    }

    // Project layer.
    let project_path = opts.config_path.or_else(|| {
        opts.project_dir
            .map(|dir| dir.join(slb_core::dirs::STATE_DIR_NAME).join("config.toml"))
    });
    if let Some(path) = project_path {
        if let Some(overlay) = try_load_file(&path)? {
            deep_merge_tracking(
                &mut merged,
                &overlay,
                "",
                ConfigLayer::Project,
                &mut field_sources,
            );
            info!(path = %path.display(), "loaded project config");
            loaded_files.push(path.display().to_string());
        }
    }

    let env_count = apply_env_overrides(&mut merged, &mut field_sources, &env_vars)?;
    if env_count > 0 {
        debug!(count = env_count, "applied environment overrides");
    }

    apply_flag_overrides(&mut merged, &mut field_sources, &opts.overrides)?;

    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a config from a single file (no layering).
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed, or validated.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let value = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
        path: path.display().to_string(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    })?;
    let config: Config = value
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

fn user_dir(explicit: Option<PathBuf>, env_vars: &HashMap<String, String>) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }
    if let Some(custom) = env_vars.get("SLB_HOME").map(PathBuf::from) {
        if custom.is_absolute() {
            return Some(custom);
        }
        tracing::warn!(path = %custom.display(), "SLB_HOME is not absolute; ignoring");
    }
    directories::BaseDirs::new().map(|d| d.home_dir().join(slb_core::dirs::STATE_DIR_NAME))
}

/// Try to load a file, returning `None` if it doesn't exist.
///
/// Reads once and checks the size afterwards, so there is no window between
/// a metadata check and the read.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    toml::from_str(&content)
        .map(Some)
        .map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use slb_core::{RateLimitAction, RiskTier, TimeoutAction};

    fn isolated(home: &Path) -> LoadOptions {
        LoadOptions {
            home_dir: Some(home.to_path_buf()),
            env: Some(HashMap::new()),
            ..LoadOptions::default()
        }
    }

    #[test]
    fn test_builtin_defaults() {
        let cfg = Config::builtin().unwrap();
        assert_eq!(cfg.general.request_timeout, 1800);
        assert_eq!(cfg.general.default_tier, RiskTier::Caution);
        assert_eq!(cfg.patterns.critical.min_approvals, 2);
        assert_eq!(cfg.patterns.caution.auto_approve_delay_seconds, 30);
        assert_eq!(cfg.patterns.critical.patterns.len(), 15);
        assert_eq!(cfg.patterns.safe.patterns[0], r"^rm\s+.*\.log$");
        assert!(validate::validate(&cfg).is_ok());
    }

    #[test]
    fn test_load_with_no_files_is_defaults() {
        let home = tempfile::tempdir().unwrap();
        let resolved = load(isolated(home.path())).unwrap();
        assert!(resolved.loaded_files.is_empty());
        assert_eq!(
            resolved.field_sources["general.timeout_action"],
            ConfigLayer::Defaults
        );
    }

    #[test]
    fn test_layer_precedence() {
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        std::fs::write(
            home.path().join("config.toml"),
            "[general]\nrequest_timeout = 100\napproval_ttl_minutes = 5\ntimeout_action = \"auto_reject\"\n",
        )
        .unwrap();
        std::fs::create_dir_all(project.path().join(".slb")).unwrap();
        std::fs::write(
            project.path().join(".slb/config.toml"),
            "[general]\nrequest_timeout = 200\napproval_ttl_minutes = 6\n",
        )
        .unwrap();

        let mut opts = isolated(home.path());
        opts.project_dir = Some(project.path().to_path_buf());
        opts.env = Some([("SLB_APPROVAL_TTL_MINUTES".to_owned(), "7".to_owned())].into());
        opts.overrides = vec!["rate_limits.rate_limit_action=queue".to_owned()];

        let resolved = load(opts).unwrap();
        let cfg = &resolved.config;
        assert_eq!(cfg.general.timeout_action, TimeoutAction::AutoReject);
        assert_eq!(cfg.general.request_timeout, 200);
        assert_eq!(cfg.general.approval_ttl_minutes, 7);
        assert_eq!(cfg.rate_limits.rate_limit_action, RateLimitAction::Queue);
        assert_eq!(resolved.loaded_files.len(), 2);
        assert_eq!(
            resolved.field_sources["general.timeout_action"],
            ConfigLayer::User
        );
        assert_eq!(
            resolved.field_sources["general.request_timeout"],
            ConfigLayer::Project
        );
    }

    #[test]
    fn test_invalid_enum_value_is_parse_error() {
        let home = tempfile::tempdir().unwrap();
        let mut opts = isolated(home.path());
        opts.overrides = vec!["general.conflict_resolution=coin_flip".to_owned()];
        assert!(matches!(load(opts), Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_validation_runs_after_merge() {
        let home = tempfile::tempdir().unwrap();
        let mut opts = isolated(home.path());
        opts.overrides = vec!["general.request_timeout=0".to_owned()];
        assert!(matches!(load(opts), Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn test_load_file_nonexistent() {
        let result = load_file(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_oversized_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&file_path, data).unwrap();

        let result = try_load_file(&file_path);
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }
}
