//! Directory layout for user-level and per-project SLB state.
//!
//! ```text
//! ~/.slb/                         (SlbHome, or $SLB_HOME)
//! └── config.toml                   (user config layer)
//!
//! <project>/.slb/                 (ProjectDir)
//! ├── config.toml                   (project config layer)
//! ├── state.db                      (SQLite ledger)
//! ├── logs/                         (per-run command logs, 0600)
//! └── rollback/req-<id>/            (rollback captures)
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::types::RequestId;

/// Name of the per-project state directory.
pub const STATE_DIR_NAME: &str = ".slb";

/// User-level SLB directory (`~/.slb/` or `$SLB_HOME`).
#[derive(Debug, Clone)]
pub struct SlbHome {
    root: PathBuf,
}

impl SlbHome {
    /// Resolve the home directory.
    ///
    /// Checks `$SLB_HOME` first, then falls back to `$HOME/.slb/`.
    ///
    /// # Errors
    ///
    /// Returns an error if `$SLB_HOME` is relative, or if neither variable is set.
    pub fn resolve() -> io::Result<Self> {
        let root = if let Ok(custom) = std::env::var("SLB_HOME") {
            let p = PathBuf::from(&custom);
            if !p.is_absolute() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "SLB_HOME must be an absolute path",
                ));
            }
            p
        } else {
            let home = std::env::var("HOME").map_err(|_| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    "neither SLB_HOME nor HOME environment variable is set",
                )
            })?;
            PathBuf::from(home).join(STATE_DIR_NAME)
        };
        Ok(Self { root })
    }

    /// Create from an explicit path (useful for testing).
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// User config file (`~/.slb/config.toml`).
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }
}

/// Per-project state directory (`<project>/.slb/`).
#[derive(Debug, Clone)]
pub struct ProjectDir {
    project: PathBuf,
}

impl ProjectDir {
    /// Use `project` as the project root.
    #[must_use]
    pub fn new(project: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
        }
    }

    /// Find the project root for `start`: the nearest ancestor holding a
    /// `.slb/` directory, else the nearest holding `.git`, else `start`.
    #[must_use]
    pub fn discover(start: &Path) -> Self {
        let find = |marker: &str| {
            start
                .ancestors()
                .find(|dir| dir.join(marker).exists())
                .map(Path::to_path_buf)
        };
        let project = find(STATE_DIR_NAME)
            .or_else(|| find(".git"))
            .unwrap_or_else(|| start.to_path_buf());
        Self { project }
    }

    /// Create the state directory tree with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation or permission setting fails.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.rollback_dir())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(self.state_dir(), perms.clone())?;
            std::fs::set_permissions(self.logs_dir(), perms)?;
        }
        Ok(())
    }

    /// Project root.
    #[must_use]
    pub fn project(&self) -> &Path {
        &self.project
    }

    /// `<project>/.slb/`.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.project.join(STATE_DIR_NAME)
    }

    /// Project config file.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join("config.toml")
    }

    /// SQLite ledger file.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.state_dir().join("state.db")
    }

    /// Per-run log directory.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }

    /// Rollback capture root.
    #[must_use]
    pub fn rollback_dir(&self) -> PathBuf {
        self.state_dir().join("rollback")
    }

    /// Capture directory for one request.
    #[must_use]
    pub fn rollback_dir_for(&self, request_id: &RequestId) -> PathBuf {
        self.rollback_dir().join(format!("req-{request_id}"))
    }
}
