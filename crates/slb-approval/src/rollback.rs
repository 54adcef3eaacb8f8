//! Pre-execution rollback capture.
//!
//! Before an approved command runs, the state it is about to destroy is
//! copied into `<project>/.slb/rollback/req-<id>/`:
//!
//! - `rm` targets are archived into `files.tar.gz`, each root under a `p<i>`
//!   prefix so restore knows where it came from
//! - `git` commands record HEAD, branch, status, the staged and unstaged
//!   diffs and the untracked file list under `git/`
//!
//! `metadata.json` describes the capture. A capture that would exceed the
//! size cap is abandoned; the command still runs.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use globset::GlobBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use slb_config::Config;
use slb_core::{ProjectDir, RequestId, Timestamp};

use crate::dryrun::rm_targets;
use crate::error::{ApprovalError, ApprovalResult};
use crate::normalize::normalize;
use crate::redact::redact;

const METADATA_FILE: &str = "metadata.json";
const ARCHIVE_FILE: &str = "files.tar.gz";
const GIT_DIR: &str = "git";
const GLOB_CHARS: &[char] = &['*', '?', '['];
const BYTES_PER_MB: u64 = 1024 * 1024;
const SECS_PER_DAY: u64 = 86_400;

/// What a capture holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackKind {
    /// Archived files and directories.
    Filesystem,
    /// Git working-tree state.
    Git,
}

/// Git state at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSnapshot {
    /// Repository top level.
    pub repo_root: PathBuf,
    /// `HEAD` commit.
    pub head: String,
    /// Checked-out branch (`HEAD` when detached).
    pub branch: String,
}

/// Contents of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackMetadata {
    /// Request the capture belongs to.
    pub request_id: RequestId,
    /// Capture kind.
    pub kind: RollbackKind,
    /// Redacted command.
    pub command: String,
    /// Working directory of the command.
    pub cwd: PathBuf,
    /// Capture time.
    pub captured_at: Timestamp,
    /// Bytes captured.
    pub size_bytes: u64,
    /// Archived roots; index `i` is stored under `p<i>`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roots: Vec<PathBuf>,
    /// Targets that did not exist at capture time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<PathBuf>,
    /// Git state, for git captures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSnapshot>,
}

/// Result of [`RollbackCapture::capture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// State was captured.
    Captured {
        /// Capture directory.
        path: PathBuf,
        /// What was captured.
        metadata: RollbackMetadata,
    },
    /// Nothing was captured; execution continues regardless.
    Skipped {
        /// Why.
        reason: String,
    },
}

/// Result of [`RollbackCapture::restore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Capture directory.
    pub path: PathBuf,
    /// Capture kind.
    pub kind: RollbackKind,
    /// Regular files written back.
    pub files: u64,
}

/// Takes, restores and prunes rollback captures for one project.
#[derive(Debug, Clone)]
pub struct RollbackCapture {
    project: ProjectDir,
    max_bytes: u64,
}

impl RollbackCapture {
    /// Capture into `project`'s state directory, up to `max_mb` megabytes.
    #[must_use]
    pub fn new(project: ProjectDir, max_mb: u64) -> Self {
        Self {
            project,
            max_bytes: max_mb.saturating_mul(BYTES_PER_MB),
        }
    }

    /// Capture settings from a loaded configuration.
    #[must_use]
    pub fn from_config(project: ProjectDir, config: &Config) -> Self {
        Self::new(project, config.general.max_rollback_size_mb)
    }

    /// Capture directory for a request.
    #[must_use]
    pub fn path_for(&self, request_id: &RequestId) -> PathBuf {
        self.project.rollback_dir_for(request_id)
    }

    /// Capture whatever `command` is about to change.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Internal`] if the capture cannot be written.
    /// Commands with no rollback strategy, missing targets and oversized
    /// captures are [`CaptureOutcome::Skipped`], not errors.
    pub fn capture(
        &self,
        request_id: &RequestId,
        command: &str,
        cwd: &Path,
        now: Timestamp,
    ) -> ApprovalResult<CaptureOutcome> {
        let tokens = normalize(command).primary_tokens;
        let outcome = match tokens.first().map(String::as_str) {
            Some("rm") => self.capture_files(request_id, command, &tokens[1..], cwd, now)?,
            Some("git") => self.capture_git(request_id, command, cwd, now)?,
            Some(program) => CaptureOutcome::Skipped {
                reason: format!("no rollback strategy for {program}"),
            },
            None => CaptureOutcome::Skipped {
                reason: "empty command".into(),
            },
        };
        match &outcome {
            CaptureOutcome::Captured { path, metadata } => info!(
                request_id = %request_id,
                path = %path.display(),
                size_bytes = metadata.size_bytes,
                "Rollback captured"
            ),
            CaptureOutcome::Skipped { reason } => {
                debug!(request_id = %request_id, reason, "Rollback capture skipped");
            },
        }
        Ok(outcome)
    }

    /// Read a capture's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::NotFound`] if there is no capture for the request.
    pub fn load(&self, request_id: &RequestId) -> ApprovalResult<RollbackMetadata> {
        let path = self.path_for(request_id).join(METADATA_FILE);
        let raw = fs::read(&path).map_err(|_| ApprovalError::NotFound {
            kind: "rollback capture",
            id: request_id.to_string(),
        })?;
        serde_json::from_slice(&raw)
            .map_err(|e| ApprovalError::Internal(format!("{}: {e}", path.display())))
    }

    /// Put captured state back.
    ///
    /// Filesystem restores refuse to replace existing paths and git restores
    /// refuse to run at all unless `force` is set.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::NotFound`] if there is no capture
    /// - [`ApprovalError::Conflict`] if a target exists and `force` is unset
    /// - [`ApprovalError::Validation`] for a git restore without `force`, or
    ///   an archive entry that would escape its root
    /// - [`ApprovalError::Internal`] for I/O or git failures
    pub fn restore(&self, request_id: &RequestId, force: bool) -> ApprovalResult<RestoreReport> {
        let metadata = self.load(request_id)?;
        let dir = self.path_for(request_id);
        let files = match metadata.kind {
            RollbackKind::Filesystem => restore_files(&dir, &metadata, force)?,
            RollbackKind::Git => {
                restore_git(&dir, &metadata, force)?;
                0
            },
        };
        info!(request_id = %request_id, files, "Rollback restored");
        Ok(RestoreReport {
            path: dir,
            kind: metadata.kind,
            files,
        })
    }

    /// Delete captures older than `retention_days`.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Internal`] if a capture cannot be removed.
    pub fn prune(&self, retention_days: u32, now: SystemTime) -> ApprovalResult<usize> {
        let root = self.project.rollback_dir();
        let Ok(entries) = fs::read_dir(&root) else {
            return Ok(0);
        };
        let age = Duration::from_secs(u64::from(retention_days).saturating_mul(SECS_PER_DAY));
        let Some(cutoff) = now.checked_sub(age) else {
            return Ok(0);
        };

        let mut removed = 0usize;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with("req-") {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if meta.is_dir() && modified < cutoff {
                fs::remove_dir_all(entry.path()).map_err(|e| io_err(&entry.path(), &e))?;
                removed = removed.saturating_add(1);
            }
        }
        if removed > 0 {
            info!(removed, retention_days, "Pruned rollback captures");
        }
        Ok(removed)
    }

    fn capture_files(
        &self,
        request_id: &RequestId,
        command: &str,
        args: &[String],
        cwd: &Path,
        now: Timestamp,
    ) -> ApprovalResult<CaptureOutcome> {
        let mut roots = Vec::new();
        let mut missing = Vec::new();
        for target in rm_targets(args) {
            let path = if Path::new(&target).is_absolute() {
                PathBuf::from(&target)
            } else {
                cwd.join(&target)
            };
            if target.contains(GLOB_CHARS) {
                let matched = expand_glob(&path)?;
                if matched.is_empty() {
                    missing.push(path);
                }
                roots.extend(matched);
            } else if path.symlink_metadata().is_ok() {
                roots.push(path);
            } else {
                missing.push(path);
            }
        }
        roots.sort();
        roots.dedup();
        if roots.is_empty() {
            return Ok(CaptureOutcome::Skipped {
                reason: "no existing rollback targets".into(),
            });
        }

        let mut size = 0u64;
        for root in &roots {
            size = size.saturating_add(tree_size(root));
            if size > self.max_bytes {
                let reason = format!("rollback capture exceeds max size ({} bytes)", self.max_bytes);
                warn!(request_id = %request_id, size_bytes = size, "{reason}");
                return Ok(CaptureOutcome::Skipped { reason });
            }
        }

        let dir = self.path_for(request_id);
        let metadata = RollbackMetadata {
            request_id: *request_id,
            kind: RollbackKind::Filesystem,
            command: redact(command),
            cwd: cwd.to_path_buf(),
            captured_at: now,
            size_bytes: size,
            roots,
            missing,
            git: None,
        };
        write_capture(&dir, |dir| {
            write_archive(&dir.join(ARCHIVE_FILE), &metadata.roots)?;
            write_metadata(dir, &metadata)
        })?;
        Ok(CaptureOutcome::Captured { path: dir, metadata })
    }

    fn capture_git(
        &self,
        request_id: &RequestId,
        command: &str,
        cwd: &Path,
        now: Timestamp,
    ) -> ApprovalResult<CaptureOutcome> {
        let Ok(top) = git(cwd, &["rev-parse", "--show-toplevel"]) else {
            return Ok(CaptureOutcome::Skipped {
                reason: "not a git repository".into(),
            });
        };
        let repo_root = PathBuf::from(top.trim());
        let head = git(&repo_root, &["rev-parse", "HEAD"])?.trim().to_string();
        let branch = git(&repo_root, &["rev-parse", "--abbrev-ref", "HEAD"])?
            .trim()
            .to_string();
        let files = [
            ("head.txt", head.clone()),
            ("branch.txt", branch.clone()),
            ("status.txt", git(&repo_root, &["status", "--porcelain"])?),
            ("diff.patch", git(&repo_root, &["diff", "--binary"])?),
            ("diff_cached.patch", git(&repo_root, &["diff", "--cached", "--binary"])?),
            (
                "untracked.txt",
                git(&repo_root, &["ls-files", "--others", "--exclude-standard"])?,
            ),
        ];
        let size = files
            .iter()
            .fold(0u64, |acc, (_, body)| acc.saturating_add(body.len() as u64));
        if size > self.max_bytes {
            let reason = format!("rollback capture exceeds max size ({} bytes)", self.max_bytes);
            warn!(request_id = %request_id, size_bytes = size, "{reason}");
            return Ok(CaptureOutcome::Skipped { reason });
        }

        let dir = self.path_for(request_id);
        let metadata = RollbackMetadata {
            request_id: *request_id,
            kind: RollbackKind::Git,
            command: redact(command),
            cwd: cwd.to_path_buf(),
            captured_at: now,
            size_bytes: size,
            roots: Vec::new(),
            missing: Vec::new(),
            git: Some(GitSnapshot {
                repo_root,
                head,
                branch,
            }),
        };
        write_capture(&dir, |dir| {
            let git_dir = dir.join(GIT_DIR);
            create_private_dir(&git_dir)?;
            for (name, body) in &files {
                write_private(&git_dir.join(name), body.as_bytes())?;
            }
            write_metadata(dir, &metadata)
        })?;
        Ok(CaptureOutcome::Captured { path: dir, metadata })
    }
}

/// Expand a glob whose wildcards may appear in any component.
fn expand_glob(pattern: &Path) -> ApprovalResult<Vec<PathBuf>> {
    let base: PathBuf = pattern
        .components()
        .take_while(|c| !c.as_os_str().to_string_lossy().contains(GLOB_CHARS))
        .collect();
    let depth = pattern.components().count().saturating_sub(base.components().count());
    let matcher = GlobBuilder::new(&pattern.to_string_lossy())
        .literal_separator(true)
        .build()
        .map_err(|e| ApprovalError::Validation(format!("invalid glob {}: {e}", pattern.display())))?
        .compile_matcher();

    let mut out = Vec::new();
    for entry in WalkDir::new(&base)
        .follow_links(false)
        .min_depth(depth)
        .max_depth(depth)
        .into_iter()
        .flatten()
    {
        if matcher.is_match(entry.path()) {
            out.push(entry.path().to_path_buf());
        }
    }
    Ok(out)
}

/// Bytes in regular files under `root` (symlinks are not followed).
fn tree_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .fold(0u64, |acc, m| acc.saturating_add(m.len()))
}

fn write_archive(dest: &Path, roots: &[PathBuf]) -> ApprovalResult<()> {
    let file = File::create(dest).map_err(|e| io_err(dest, &e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    for (i, root) in roots.iter().enumerate() {
        let name = format!("p{i}");
        let is_dir = root.symlink_metadata().map(|m| m.is_dir()).unwrap_or(false);
        let result = if is_dir {
            builder.append_dir_all(&name, root)
        } else {
            builder.append_path_with_name(root, &name)
        };
        result.map_err(|e| io_err(root, &e))?;
    }
    let encoder = builder.into_inner().map_err(|e| io_err(dest, &e))?;
    encoder.finish().map_err(|e| io_err(dest, &e))?;
    Ok(())
}

fn restore_files(dir: &Path, metadata: &RollbackMetadata, force: bool) -> ApprovalResult<u64> {
    for root in &metadata.roots {
        if root.symlink_metadata().is_ok() && !force {
            return Err(ApprovalError::Conflict(format!(
                "path exists: {} (use --force to overwrite)",
                root.display()
            )));
        }
    }
    for root in &metadata.roots {
        remove_existing(root)?;
    }

    let archive_path = dir.join(ARCHIVE_FILE);
    let file = File::open(&archive_path).map_err(|e| io_err(&archive_path, &e))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);

    let mut files = 0u64;
    for entry in archive.entries().map_err(|e| io_err(&archive_path, &e))? {
        let mut entry = entry.map_err(|e| io_err(&archive_path, &e))?;
        let entry_type = entry.header().entry_type();
        if !matches!(
            entry_type,
            tar::EntryType::Regular | tar::EntryType::Directory | tar::EntryType::Symlink
        ) {
            continue;
        }
        let name = entry
            .path()
            .map_err(|e| io_err(&archive_path, &e))?
            .into_owned();
        let (root, dest) = resolve_entry(&metadata.roots, &name)?;
        ensure_no_symlink_parents(root, &dest)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, &e))?;
        }
        entry.unpack(&dest).map_err(|e| io_err(&dest, &e))?;
        if entry_type == tar::EntryType::Regular {
            files = files.saturating_add(1);
        }
    }
    Ok(files)
}

/// Map an archive name `p<i>[/rel]` back to its root and destination.
fn resolve_entry<'a>(roots: &'a [PathBuf], name: &Path) -> ApprovalResult<(&'a Path, PathBuf)> {
    let invalid = || ApprovalError::Validation(format!("invalid archive entry {}", name.display()));
    let mut components = name.components();
    let prefix = match components.next() {
        Some(Component::Normal(p)) => p.to_string_lossy().into_owned(),
        _ => return Err(invalid()),
    };
    let index: usize = prefix
        .strip_prefix('p')
        .and_then(|i| i.parse().ok())
        .ok_or_else(invalid)?;
    let root = roots.get(index).ok_or_else(invalid)?;

    let mut dest = root.clone();
    for component in components {
        match component {
            Component::Normal(part) => dest.push(part),
            Component::CurDir => {},
            _ => return Err(invalid()),
        }
    }
    Ok((root.as_path(), dest))
}

fn ensure_no_symlink_parents(root: &Path, dest: &Path) -> ApprovalResult<()> {
    let Some(parent) = dest.parent() else {
        return Ok(());
    };
    for ancestor in parent.ancestors() {
        if !ancestor.starts_with(root) {
            break;
        }
        if ancestor
            .symlink_metadata()
            .is_ok_and(|m| m.file_type().is_symlink())
        {
            return Err(ApprovalError::Validation(format!(
                "refusing to restore through symlink {}",
                ancestor.display()
            )));
        }
    }
    Ok(())
}

fn remove_existing(path: &Path) -> ApprovalResult<()> {
    let Ok(meta) = path.symlink_metadata() else {
        return Ok(());
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| io_err(path, &e))
}

fn restore_git(dir: &Path, metadata: &RollbackMetadata, force: bool) -> ApprovalResult<()> {
    if !force {
        return Err(ApprovalError::Validation(
            "git rollback is destructive (use --force)".into(),
        ));
    }
    let snapshot = metadata
        .git
        .as_ref()
        .ok_or_else(|| ApprovalError::Internal("git capture has no snapshot".into()))?;
    let repo = &snapshot.repo_root;

    if snapshot.branch != "HEAD" {
        if let Err(e) = git(repo, &["checkout", &snapshot.branch]) {
            warn!(branch = %snapshot.branch, error = %e, "Could not check out captured branch");
        }
    }
    git(repo, &["reset", "--hard", &snapshot.head])?;

    let git_dir = dir.join(GIT_DIR);
    for (patch, cached) in [("diff_cached.patch", true), ("diff.patch", false)] {
        let path = git_dir.join(patch);
        let non_empty = fs::metadata(&path).is_ok_and(|m| m.len() > 0);
        if !non_empty {
            continue;
        }
        let path_arg = path.to_string_lossy();
        let mut args = vec!["apply"];
        if cached {
            args.push("--cached");
        }
        args.push(&path_arg);
        git(repo, &args)?;
    }
    Ok(())
}

fn git(cwd: &Path, args: &[&str]) -> ApprovalResult<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(cwd)
        .args(args)
        .output()
        .map_err(|e| ApprovalError::Internal(format!("failed to run git: {e}")))?;
    if !output.status.success() {
        return Err(ApprovalError::Internal(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Create `dir` and fill it; a failed fill removes the directory again.
fn write_capture<F>(dir: &Path, fill: F) -> ApprovalResult<()>
where
    F: FnOnce(&Path) -> ApprovalResult<()>,
{
    create_private_dir(dir)?;
    let filled = fill(dir);
    if filled.is_err()
        && let Err(e) = fs::remove_dir_all(dir)
    {
        warn!(path = %dir.display(), error = %e, "Failed to remove partial rollback capture");
    }
    filled
}

fn write_metadata(dir: &Path, metadata: &RollbackMetadata) -> ApprovalResult<()> {
    let body = serde_json::to_vec_pretty(metadata)
        .map_err(|e| ApprovalError::Internal(format!("rollback metadata: {e}")))?;
    write_private(&dir.join(METADATA_FILE), &body)
}

fn create_private_dir(dir: &Path) -> ApprovalResult<()> {
    fs::create_dir_all(dir).map_err(|e| io_err(dir, &e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|e| io_err(dir, &e))?;
    }
    Ok(())
}

fn write_private(path: &Path, body: &[u8]) -> ApprovalResult<()> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path).map_err(|e| io_err(path, &e))?;
    file.write_all(body).map_err(|e| io_err(path, &e))
}

fn io_err(path: &Path, e: &std::io::Error) -> ApprovalError {
    ApprovalError::Internal(format!("{}: {e}", path.display()))
}
