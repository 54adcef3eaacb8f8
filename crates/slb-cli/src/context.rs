//! Per-invocation context: resolved project, effective configuration and the
//! engine opened over the project's ledger.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use tracing::debug;

use slb_approval::ApprovalEngine;
use slb_config::{Config, LoadOptions, ResolvedConfig};
use slb_core::ProjectDir;
use slb_storage::Ledger;

use crate::config_bridge;
use crate::formatter::OutputFormat;

/// Flags shared by every subcommand, passed by value into handlers.
#[derive(Debug, Clone, Default)]
pub(crate) struct GlobalArgs {
    pub(crate) format: OutputFormat,
    pub(crate) verbose: bool,
    pub(crate) project: Option<PathBuf>,
    pub(crate) config: Option<PathBuf>,
    pub(crate) overrides: Vec<String>,
}

/// Everything a command handler needs.
pub(crate) struct CliContext {
    pub(crate) global: GlobalArgs,
    pub(crate) project: ProjectDir,
    pub(crate) resolved: ResolvedConfig,
    config: Arc<Config>,
}

impl CliContext {
    /// Resolve the project and load its layered configuration.
    ///
    /// `--project` wins; otherwise the project is discovered from the
    /// current directory.
    pub(crate) fn load(global: GlobalArgs) -> anyhow::Result<Self> {
        let root = match &global.project {
            Some(path) => absolute(path)?,
            None => {
                let cwd = std::env::current_dir().context("reading current directory")?;
                ProjectDir::discover(&cwd).project().to_path_buf()
            },
        };
        Self::load_at(global, root)
    }

    fn load_at(global: GlobalArgs, root: PathBuf) -> anyhow::Result<Self> {
        let resolved = slb_config::load(LoadOptions {
            project_dir: Some(root.clone()),
            config_path: global.config.clone(),
            overrides: global.overrides.clone(),
            ..LoadOptions::default()
        })?;
        debug!(project = %root.display(), files = ?resolved.loaded_files, "Configuration loaded");
        let config = Arc::new(resolved.config.clone());
        Ok(Self {
            global,
            project: ProjectDir::new(root),
            resolved,
            config,
        })
    }

    /// The same invocation aimed at another project, for cross-project
    /// reviews. Its configuration is loaded from that project.
    pub(crate) fn retarget(&self, project: &Path) -> anyhow::Result<Self> {
        let root = absolute(project)?;
        if !root.is_dir() {
            anyhow::bail!(slb_approval::ApprovalError::Validation(format!(
                "target project does not exist: {}",
                root.display()
            )));
        }
        Self::load_at(self.global.clone(), root)
    }

    pub(crate) fn format(&self) -> OutputFormat {
        self.global.format
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Ledger location after `history.database_path` is applied.
    pub(crate) fn database_path(&self) -> PathBuf {
        config_bridge::database_path(&self.config, &self.project, home_dir().as_deref())
    }

    /// Create the state directory if needed and open the engine.
    pub(crate) fn engine(&self) -> anyhow::Result<ApprovalEngine> {
        self.project
            .ensure()
            .with_context(|| format!("creating {}", self.project.state_dir().display()))?;
        let db_path = self.database_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let ledger = Ledger::open(&db_path)
            .with_context(|| format!("opening ledger {}", db_path.display()))?;
        let engine =
            ApprovalEngine::builder(ledger, Arc::clone(&self.config), self.project.clone()).build()?;
        Ok(engine)
    }
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("reading current directory")?;
    Ok(cwd.join(path))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global_for(dir: &Path) -> GlobalArgs {
        GlobalArgs {
            project: Some(dir.to_path_buf()),
            ..GlobalArgs::default()
        }
    }

    #[tokio::test]
    async fn test_engine_creates_state_dir_and_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CliContext::load(global_for(dir.path())).unwrap();
        assert_eq!(ctx.project.project(), dir.path());

        let engine = ctx.engine().unwrap();
        assert!(dir.path().join(".slb/state.db").exists());
        assert!(dir.path().join(".slb/logs").is_dir());
        let sessions = engine.list_sessions(None, false).await.unwrap();
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_flag_overrides_reach_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut global = global_for(dir.path());
        global.overrides = vec!["rate_limits.max_pending_per_session=2".into()];
        let ctx = CliContext::load(global).unwrap();
        assert_eq!(ctx.config().rate_limits.max_pending_per_session, 2);
    }

    #[test]
    fn test_database_path_from_project_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".slb")).unwrap();
        std::fs::write(
            dir.path().join(".slb/config.toml"),
            "[history]\ndatabase_path = \"ledger/slb.db\"\n",
        )
        .unwrap();

        let ctx = CliContext::load(global_for(dir.path())).unwrap();
        assert_eq!(ctx.database_path(), dir.path().join("ledger/slb.db"));
        ctx.engine().unwrap();
        assert!(dir.path().join("ledger/slb.db").exists());
    }

    #[test]
    fn test_retarget_rejects_missing_project() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CliContext::load(global_for(dir.path())).unwrap();
        let err = ctx.retarget(&dir.path().join("nope")).err().unwrap();
        assert_eq!(crate::formatter::error_kind(&err), "validation_error");
    }
}
