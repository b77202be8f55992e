//! Registry of per-unit workspaces.
//!
//! A workspace is a linked `git worktree` under the configured base directory,
//! checked out on the branch `<prefix><unitId>`. The registry keeps no state of
//! its own; `git worktree list` is the source of truth.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::errors::WorktreeError;
use crate::git::{GitCli, WorktreeEntry};
use crate::models::{RemovalReport, Workspace, WorkspaceStatus};

/// Creates, lists and removes workspaces for one shared repository.
#[derive(Debug, Clone)]
pub struct WorkspaceRegistry {
    git: GitCli,
    base_dir: PathBuf,
    branch_prefix: String,
    max_worktrees: usize,
    stale_after_secs: u64,
}

impl WorkspaceRegistry {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            git: GitCli::new(&config.repo.path),
            base_dir: absolute(&config.worktree_dir()),
            branch_prefix: config.worktree.branch_prefix.clone(),
            max_worktrees: config.worktree.max_worktrees,
            stale_after_secs: config.worktree.stale_after_secs,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Branch name owned by `unit_id`.
    pub fn branch_name(&self, unit_id: &str) -> String {
        format!("{}{}", self.branch_prefix, unit_id)
    }

    /// Directory a workspace for `unit_id` lives in.
    pub fn workspace_path(&self, unit_id: &str) -> PathBuf {
        self.base_dir.join(unit_id)
    }

    // -----------------------------------------------------------------------
    // Create / remove
    // -----------------------------------------------------------------------

    /// Create a workspace on a new branch from the shared checkout's HEAD.
    ///
    /// On failure nothing is left behind: the directory (and a base directory
    /// made for it) is removed, a branch created by the attempt is deleted
    /// and stale worktree metadata pruned. The base directory is listed in
    /// `info/exclude` when it lies inside the shared checkout.
    #[instrument(skip(self), fields(base_dir = %self.base_dir.display()))]
    pub fn create(&self, unit_id: &str) -> Result<Workspace, WorktreeError> {
        validate_unit_id(unit_id)?;
        let branch = self.branch_name(unit_id);
        let path = self.workspace_path(unit_id);

        let workspaces = self.list()?;
        if workspaces.iter().any(|w| w.unit_id == unit_id) {
            return Err(WorktreeError::AlreadyExists {
                unit_id: unit_id.to_string(),
                detail: "a managed worktree is registered".into(),
            });
        }
        if path.exists() {
            return Err(WorktreeError::AlreadyExists {
                unit_id: unit_id.to_string(),
                detail: format!("directory {} exists", path.display()),
            });
        }
        if self.git.branch_exists(&branch)? {
            return Err(WorktreeError::AlreadyExists {
                unit_id: unit_id.to_string(),
                detail: format!("branch {} exists", branch),
            });
        }

        let active = workspaces
            .iter()
            .filter(|w| w.status == WorkspaceStatus::Active)
            .count();
        if active >= self.max_worktrees {
            return Err(WorktreeError::CapacityExceeded {
                active,
                max: self.max_worktrees,
            });
        }

        if let Err(e) = self.git.exclude_dir(&self.base_dir) {
            warn!(base_dir = %self.base_dir.display(), error = %e, "could not exclude workspace directory");
        }
        let created_base = !self.base_dir.exists();
        std::fs::create_dir_all(&self.base_dir).map_err(|source| WorktreeError::Io {
            path: self.base_dir.clone(),
            source,
        })?;

        if let Err(e) = self.git.worktree_add(&path, &branch, "HEAD") {
            warn!(unit_id, error = %e, "worktree add failed, cleaning up");
            self.discard_partial(&path, &branch, created_base);
            return Err(e.into());
        }

        let workspace = self.describe(unit_id, &path, &branch)?;
        info!(unit_id, branch = %branch, path = %path.display(), "workspace created");
        Ok(workspace)
    }

    fn discard_partial(&self, path: &Path, branch: &str, created_base: bool) {
        if path.exists() {
            if let Err(e) = std::fs::remove_dir_all(path) {
                warn!(path = %path.display(), error = %e, "failed to remove partial workspace directory");
            }
        }
        // Only an empty base directory made by this attempt goes.
        if created_base {
            if let Err(e) = std::fs::remove_dir(&self.base_dir) {
                warn!(base_dir = %self.base_dir.display(), error = %e, "failed to remove base directory");
            }
        }
        match self.git.branch_exists(branch) {
            Ok(true) => {
                if let Err(e) = self.git.delete_branch(branch, true) {
                    warn!(branch, error = %e, "failed to delete partial branch");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(branch, error = %e, "could not check for partial branch"),
        }
        if let Err(e) = self.git.worktree_prune() {
            warn!(error = %e, "worktree prune failed");
        }
    }

    /// Remove the workspace for `unit_id` and try to delete its branch.
    ///
    /// Without `force`, a workspace with uncommitted changes is refused and a
    /// branch with unmerged commits is kept (reported as a warning).
    #[instrument(skip(self))]
    pub fn remove(&self, unit_id: &str, force: bool) -> Result<RemovalReport, WorktreeError> {
        let workspace = self
            .get(unit_id)?
            .ok_or_else(|| WorktreeError::NotFound(unit_id.to_string()))?;

        if workspace.is_dirty() && !force {
            return Err(WorktreeError::DirtyWorkspace {
                unit_id: unit_id.to_string(),
                changes: workspace.uncommitted_change_count,
            });
        }

        self.git.worktree_remove(&workspace.path, force)?;
        if workspace.path.exists() {
            std::fs::remove_dir_all(&workspace.path).map_err(|source| WorktreeError::Io {
                path: workspace.path.clone(),
                source,
            })?;
        }

        let (branch_deleted, branch_warning) =
            match self.git.delete_branch(&workspace.branch_name, force) {
                Ok(()) => (true, None),
                Err(e) => {
                    let detail = e.stderr().map(str::to_string).unwrap_or_else(|| e.to_string());
                    warn!(unit_id, branch = %workspace.branch_name, %detail, "branch kept");
                    (false, Some(detail))
                }
            };

        info!(unit_id, branch_deleted, "workspace removed");
        Ok(RemovalReport {
            unit_id: workspace.unit_id,
            path: workspace.path,
            branch_name: workspace.branch_name,
            branch_deleted,
            branch_warning,
        })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// All managed workspaces, sorted by unit id.
    pub fn list(&self) -> Result<Vec<Workspace>, WorktreeError> {
        let base = canonical(&self.base_dir);
        let mut workspaces = Vec::new();
        for entry in self.git.worktree_list()? {
            let Some(unit_id) = self.managed_unit(&entry, &base) else {
                continue;
            };
            if !entry.path.exists() {
                debug!(path = %entry.path.display(), "worktree directory missing; prune to drop it");
                continue;
            }
            let branch = self.branch_name(&unit_id);
            workspaces.push(self.describe(&unit_id, &entry.path, &branch)?);
        }
        workspaces.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        Ok(workspaces)
    }

    pub fn get(&self, unit_id: &str) -> Result<Option<Workspace>, WorktreeError> {
        validate_unit_id(unit_id)?;
        Ok(self.list()?.into_iter().find(|w| w.unit_id == unit_id))
    }

    pub fn exists(&self, unit_id: &str) -> Result<bool, WorktreeError> {
        Ok(self.get(unit_id)?.is_some())
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Force-remove every stale workspace. Individual failures are logged
    /// and skipped. Returns the removed unit ids.
    #[instrument(skip(self))]
    pub fn cleanup_stale(&self) -> Result<Vec<String>, WorktreeError> {
        let mut removed = Vec::new();
        for workspace in self.list()? {
            if workspace.status != WorkspaceStatus::Stale {
                continue;
            }
            match self.remove(&workspace.unit_id, true) {
                Ok(report) => removed.push(report.unit_id),
                Err(e) => warn!(unit_id = %workspace.unit_id, error = %e, "failed to remove stale workspace"),
            }
        }
        info!(count = removed.len(), "stale workspaces removed");
        Ok(removed)
    }

    /// Drop worktree metadata whose directories no longer exist.
    pub fn prune(&self) -> Result<(), WorktreeError> {
        self.git.worktree_prune()?;
        Ok(())
    }

    /// A worktree is managed when it sits at `<base>/<unit>` on `<prefix><unit>`.
    fn managed_unit(&self, entry: &WorktreeEntry, base: &Path) -> Option<String> {
        if entry.bare {
            return None;
        }
        let unit = entry.branch.as_deref()?.strip_prefix(&self.branch_prefix)?;
        if unit.is_empty() || canonical(&entry.path) != base.join(unit) {
            return None;
        }
        Some(unit.to_string())
    }

    fn describe(&self, unit_id: &str, path: &Path, branch: &str) -> Result<Workspace, WorktreeError> {
        let metadata = std::fs::metadata(path).map_err(|source| WorktreeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let created: SystemTime = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(|source| WorktreeError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let created_at = DateTime::<Utc>::from(created);
        let changes = self.git.at(path).status_porcelain()?.len();

        Ok(Workspace {
            unit_id: unit_id.to_string(),
            path: path.to_path_buf(),
            branch_name: branch.to_string(),
            created_at,
            uncommitted_change_count: changes,
            status: staleness(created_at, Utc::now(), self.stale_after_secs),
        })
    }
}

/// Stale once the age strictly exceeds the threshold.
fn staleness(created_at: DateTime<Utc>, now: DateTime<Utc>, stale_after_secs: u64) -> WorkspaceStatus {
    let age_ms = (now - created_at).num_milliseconds();
    let threshold_ms = i64::try_from(stale_after_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    if age_ms > threshold_ms {
        WorkspaceStatus::Stale
    } else {
        WorkspaceStatus::Active
    }
}

/// Unit ids double as directory names and branch suffixes.
pub fn validate_unit_id(unit_id: &str) -> Result<(), WorktreeError> {
    let invalid = |reason: &str| {
        Err(WorktreeError::InvalidUnitId {
            unit_id: unit_id.to_string(),
            reason: reason.to_string(),
        })
    };

    if unit_id.is_empty() {
        return invalid("must not be empty");
    }
    if unit_id.starts_with('.') || unit_id.starts_with('-') {
        return invalid("must not start with '.' or '-'");
    }
    if let Some(c) = unit_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return invalid(&format!("character {:?} is not allowed", c));
    }
    if unit_id.contains("..") || unit_id.ends_with('.') || unit_id.ends_with(".lock") {
        return invalid("not a valid branch name component");
    }
    Ok(())
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_validate_unit_id_accepts() {
        for id in ["s1", "story-42", "feat_x.v2", "A"] {
            assert!(validate_unit_id(id).is_ok(), "{id}");
        }
    }

    #[test]
    fn test_validate_unit_id_rejects() {
        for id in ["", ".hidden", "-x", "a/b", "a b", "a..b", "x.lock", "trail."] {
            assert!(
                matches!(validate_unit_id(id), Err(WorktreeError::InvalidUnitId { .. })),
                "{id}"
            );
        }
    }

    #[test]
    fn test_staleness_threshold() {
        let now = Utc::now();
        assert_eq!(
            staleness(now - Duration::seconds(10), now, 60),
            WorkspaceStatus::Active
        );
        assert_eq!(
            staleness(now - Duration::seconds(61), now, 60),
            WorkspaceStatus::Stale
        );
        assert_eq!(staleness(now, now, 0), WorkspaceStatus::Active);
        assert_eq!(
            staleness(now - Duration::milliseconds(5), now, 0),
            WorkspaceStatus::Stale
        );
    }

    #[test]
    fn test_branch_and_path_naming() {
        let mut config = AppConfig::default();
        config.repo.path = PathBuf::from("/srv/repo");
        let registry = WorkspaceRegistry::new(&config);
        assert_eq!(registry.branch_name("s1"), "story/s1");
        assert_eq!(
            registry.workspace_path("s1"),
            PathBuf::from("/srv/repo/.worktrees/s1")
        );
    }

    #[test]
    fn test_managed_unit_filter() {
        let mut config = AppConfig::default();
        config.repo.path = PathBuf::from("/srv/repo");
        let registry = WorkspaceRegistry::new(&config);
        let base = PathBuf::from("/srv/repo/.worktrees");
        let entry = |path: &str, branch: Option<&str>| WorktreeEntry {
            path: PathBuf::from(path),
            head: None,
            branch: branch.map(str::to_string),
            bare: false,
            locked: false,
            prunable: false,
        };
        let managed = |path: &str, branch: Option<&str>| registry.managed_unit(&entry(path, branch), &base);

        assert_eq!(managed("/srv/repo/.worktrees/s1", Some("story/s1")), Some("s1".into()));
        assert_eq!(managed("/srv/repo/.worktrees/s1", Some("main")), None);
        assert_eq!(managed("/srv/repo/.worktrees/s1", None), None);
        assert_eq!(managed("/srv/repo/.worktrees", Some("story/")), None);
        // Right branch, wrong place: the shared checkout or a foreign worktree.
        assert_eq!(managed("/srv/repo", Some("story/s1")), None);
        assert_eq!(managed("/elsewhere/s1", Some("story/s1")), None);
        assert_eq!(managed("/srv/repo/.worktrees/s2", Some("story/s1")), None);
    }
}
