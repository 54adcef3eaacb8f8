//! Bridge from `slb_config::Config` to the telemetry and storage layers.

use std::path::{Path, PathBuf};

use slb_config::Config;
use slb_core::ProjectDir;
use slb_telemetry::{LogConfig, LogFormat, LogTarget};

/// Logging setup from the `[logging]` section. `--verbose` forces `debug`.
///
/// Output always goes to stderr so stdout stays parseable.
pub(crate) fn to_log_config(config: &Config, verbose: bool) -> LogConfig {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let format = config
        .logging
        .format
        .parse::<LogFormat>()
        .unwrap_or_default();
    LogConfig::new(level)
        .with_format(format)
        .with_target(LogTarget::Stderr)
        .with_directives(config.logging.directives.iter().cloned())
}

/// Logging used before (or without) a loadable configuration.
pub(crate) fn fallback_log_config(verbose: bool) -> LogConfig {
    LogConfig::new(if verbose { "debug" } else { "warn" }).with_target(LogTarget::Stderr)
}

/// Ledger file for `project`: `history.database_path` when set (relative
/// paths are taken from the project root, `~/` from the home directory),
/// otherwise `<project>/.slb/state.db`.
pub(crate) fn database_path(config: &Config, project: &ProjectDir, home: Option<&Path>) -> PathBuf {
    let Some(raw) = config
        .history
        .database_path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
    else {
        return project.database_path();
    };
    if let (Some(rest), Some(home)) = (raw.strip_prefix("~/"), home) {
        return home.join(rest);
    }
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project.project().join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::builtin().unwrap()
    }

    #[test]
    fn test_log_config_defaults_to_warn_on_stderr() {
        let lc = to_log_config(&config(), false);
        assert_eq!(lc.level, "warn");
        assert_eq!(lc.target, LogTarget::Stderr);
        assert_eq!(lc.format, LogFormat::Compact);
    }

    #[test]
    fn test_verbose_overrides_level() {
        let mut cfg = config();
        cfg.logging.level = "error".into();
        assert_eq!(to_log_config(&cfg, true).level, "debug");
    }

    #[test]
    fn test_unknown_format_falls_back() {
        let mut cfg = config();
        cfg.logging.format = "sparkles".into();
        assert_eq!(to_log_config(&cfg, false).format, LogFormat::Compact);
    }

    #[test]
    fn test_database_path_default_and_overrides() {
        let project = ProjectDir::new("/work/proj");
        let mut cfg = config();
        assert_eq!(
            database_path(&cfg, &project, None),
            PathBuf::from("/work/proj/.slb/state.db")
        );

        cfg.history.database_path = Some("shared/slb.db".into());
        assert_eq!(
            database_path(&cfg, &project, None),
            PathBuf::from("/work/proj/shared/slb.db")
        );

        cfg.history.database_path = Some("/var/lib/slb.db".into());
        assert_eq!(
            database_path(&cfg, &project, None),
            PathBuf::from("/var/lib/slb.db")
        );

        cfg.history.database_path = Some("~/slb/state.db".into());
        assert_eq!(
            database_path(&cfg, &project, Some(Path::new("/home/agent"))),
            PathBuf::from("/home/agent/slb/state.db")
        );
    }
}
