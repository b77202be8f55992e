//! Per-unit checkpoint store and rollback.
//!
//! Each unit owns a state directory holding two JSON documents:
//!
//! - `commits.json`: the live checkpoint of every subunit, keyed by subunit id.
//! - `rollback-log.json`: every rollback attempt, oldest first.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::errors::{CheckpointError, GitError, WorktreeError};
use crate::git::{GitCli, StatusEntry};
use crate::models::{
    Checkpoint, RollbackLogEntry, RollbackOperation, RollbackOptions, RollbackOutcome,
    RollbackSummary, Workspace,
};
use crate::prompt::{Confirm, TerminalConfirm};
use crate::store::{read_json, write_json};
use crate::worktree::validate_unit_id;

const COMMITS_FILE: &str = "commits.json";
const ROLLBACK_LOG_FILE: &str = "rollback-log.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitsDocument {
    unit_id: String,
    #[serde(default)]
    commits: BTreeMap<String, CommitRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitRecord {
    last_good: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RollbackLogDocument {
    #[serde(default)]
    rollbacks: Vec<RollbackLogEntry>,
}

/// Checkpoints and rollback log of one unit, applied to one checkout.
pub struct CheckpointStore {
    unit_id: String,
    dir: PathBuf,
    git: GitCli,
    confirm: Box<dyn Confirm>,
}

impl CheckpointStore {
    /// Store for `unit_id` whose rollbacks act on the checkout behind `git`.
    ///
    /// Rollbacks ask for confirmation on the terminal unless replaced with
    /// [`CheckpointStore::with_confirm`].
    pub fn open(config: &AppConfig, unit_id: &str, git: GitCli) -> Result<Self, CheckpointError> {
        validate_unit_id(unit_id).map_err(|e| match e {
            WorktreeError::InvalidUnitId { unit_id, reason } => {
                CheckpointError::InvalidUnitId { unit_id, reason }
            }
            other => CheckpointError::InvalidUnitId {
                unit_id: unit_id.to_string(),
                reason: other.to_string(),
            },
        })?;
        let state_dir = config.state_dir();
        if let Err(e) = GitCli::new(&config.repo.path).exclude_dir(&state_dir) {
            warn!(dir = %state_dir.display(), error = %e, "could not exclude checkpoint state directory");
        }
        Ok(Self {
            unit_id: unit_id.to_string(),
            dir: state_dir.join(unit_id),
            git,
            confirm: Box::new(TerminalConfirm),
        })
    }

    /// Store for the unit of `workspace`, acting on the workspace checkout.
    pub fn for_workspace(config: &AppConfig, workspace: &Workspace) -> Result<Self, CheckpointError> {
        Self::open(config, &workspace.unit_id, GitCli::new(&workspace.path))
    }

    pub fn with_confirm(mut self, confirm: Box<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    /// Record the last good position of `subunit_id`, replacing any earlier
    /// one.
    ///
    /// `commit_ref` defaults to HEAD; an explicit ref is verified and stored
    /// as a full commit id. A non-empty `file_scope` makes later rollbacks
    /// restore only those paths.
    #[instrument(skip(self, file_scope), fields(unit_id = %self.unit_id))]
    pub fn save_checkpoint(
        &self,
        subunit_id: &str,
        commit_ref: Option<&str>,
        file_scope: &[String],
    ) -> Result<Checkpoint, CheckpointError> {
        let resolved = match commit_ref {
            Some(r) => self.git.rev_parse(r)?,
            None => self.git.head_sha()?,
        };
        let timestamp = Utc::now();

        let mut doc = self.load_commits()?;
        doc.commits.insert(
            subunit_id.to_string(),
            CommitRecord {
                last_good: resolved.clone(),
                timestamp,
                files: file_scope.to_vec(),
            },
        );
        write_json(&self.commits_path(), &doc)?;

        info!(subunit_id, commit = %resolved, files = file_scope.len(), "checkpoint saved");
        Ok(Checkpoint {
            unit_id: self.unit_id.clone(),
            subunit_id: subunit_id.to_string(),
            commit_ref: resolved,
            timestamp,
            file_scope: file_scope.to_vec(),
        })
    }

    pub fn get_checkpoint(&self, subunit_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let doc = self.load_commits()?;
        Ok(doc
            .commits
            .get(subunit_id)
            .map(|record| self.to_checkpoint(subunit_id, record)))
    }

    /// All live checkpoints, ordered by subunit id.
    pub fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let doc = self.load_commits()?;
        Ok(doc
            .commits
            .iter()
            .map(|(id, record)| self.to_checkpoint(id, record))
            .collect())
    }

    /// Returns whether a checkpoint was removed.
    pub fn remove_checkpoint(&self, subunit_id: &str) -> Result<bool, CheckpointError> {
        let mut doc = self.load_commits()?;
        let removed = doc.commits.remove(subunit_id).is_some();
        if removed {
            write_json(&self.commits_path(), &doc)?;
            debug!(subunit_id, "checkpoint removed");
        }
        Ok(removed)
    }

    /// Drop every checkpoint of the unit. The rollback log is kept.
    pub fn clear_all(&self) -> Result<usize, CheckpointError> {
        let mut doc = self.load_commits()?;
        let count = doc.commits.len();
        doc.commits.clear();
        write_json(&self.commits_path(), &doc)?;
        info!(unit_id = %self.unit_id, count, "checkpoints cleared");
        Ok(count)
    }

    /// Every rollback attempt, oldest first.
    pub fn rollback_log(&self) -> Result<Vec<RollbackLogEntry>, CheckpointError> {
        let doc: RollbackLogDocument = read_json(&self.log_path())?.unwrap_or_default();
        Ok(doc.rollbacks)
    }

    // -----------------------------------------------------------------------
    // Rollback
    // -----------------------------------------------------------------------

    /// Return `subunit_id`'s files (or the whole checkout) to its checkpoint.
    ///
    /// Every attempt that reaches a decision is appended to the rollback log,
    /// including no-ops, cancellations and failures. Untracked files are
    /// left alone.
    #[instrument(skip(self, options), fields(unit_id = %self.unit_id, hard = options.hard))]
    pub fn rollback(
        &mut self,
        subunit_id: &str,
        options: &RollbackOptions,
    ) -> Result<RollbackLogEntry, CheckpointError> {
        let checkpoint = self
            .get_checkpoint(subunit_id)?
            .ok_or_else(|| CheckpointError::NotFound(subunit_id.to_string()))?;
        let current = self.git.head_sha()?;
        // Rollbacks never touch untracked files, so they do not count as drift.
        let status: Vec<StatusEntry> = self
            .git
            .status_porcelain()?
            .into_iter()
            .filter(|s| !s.is_untracked())
            .collect();
        let target = checkpoint.commit_ref.clone();

        let (operation, files) = if checkpoint.is_targeted() {
            let dirty_in_scope = status
                .iter()
                .any(|s| in_scope(&s.path, &checkpoint.file_scope));
            if current == target && !dirty_in_scope {
                return self.log_noop(&checkpoint, &current, &options.reason);
            }
            (RollbackOperation::RestoreFiles, checkpoint.file_scope.clone())
        } else {
            if current == target && status.is_empty() {
                return self.log_noop(&checkpoint, &current, &options.reason);
            }
            let changed = if current == target {
                Vec::new()
            } else {
                self.git.diff_names(&target, &current)?
            };
            (RollbackOperation::ResetBranch, affected_files(changed, &status))
        };

        let mut entry = RollbackLogEntry {
            subunit_id: subunit_id.to_string(),
            timestamp: Utc::now(),
            from: current.clone(),
            to: target.clone(),
            reason: options.reason.clone(),
            files_affected: files.clone(),
            success: false,
            error: None,
            outcome: RollbackOutcome::Failed,
        };

        if !options.hard {
            let summary = RollbackSummary {
                subunit_id: subunit_id.to_string(),
                current_ref: current.clone(),
                target_ref: target.clone(),
                files: files.clone(),
                operation,
                reason: options.reason.clone(),
            };
            let confirmed = match self.confirm.confirm(&summary) {
                Ok(answer) => answer,
                Err(e) => {
                    entry.error = Some(format!("confirmation failed: {}", e));
                    self.append_log(entry)?;
                    return Err(CheckpointError::Prompt(e.to_string()));
                }
            };
            if !confirmed {
                entry.outcome = RollbackOutcome::Cancelled;
                entry.error = Some("declined at confirmation".into());
                self.append_log(entry)?;
                info!(subunit_id, "rollback cancelled");
                return Err(CheckpointError::Cancelled(subunit_id.to_string()));
            }
        }

        let result = match operation {
            RollbackOperation::RestoreFiles => self.restore_scope(&target, &files),
            RollbackOperation::ResetBranch => self.git.reset_hard(&target),
        };

        match result {
            Ok(()) => {
                entry.success = true;
                entry.outcome = match operation {
                    RollbackOperation::RestoreFiles => RollbackOutcome::Restored,
                    RollbackOperation::ResetBranch => RollbackOutcome::Reset,
                };
                self.append_log(entry.clone())?;
                info!(subunit_id, %operation, to = %target, "rollback applied");
                Ok(entry)
            }
            Err(e) => {
                warn!(subunit_id, error = %e, "rollback failed");
                entry.error = Some(e.to_string());
                self.append_log(entry)?;
                Err(e.into())
            }
        }
    }

    /// Put the scoped paths back to their state at `target`: paths present
    /// there are checked out, tracked files added since are deleted.
    fn restore_scope(&self, target: &str, scope: &[String]) -> Result<(), GitError> {
        let added = self.git.added_since(target, scope)?;
        let mut present = Vec::with_capacity(scope.len());
        for path in scope {
            if self.git.exists_at(target, path)? {
                present.push(path.clone());
            }
        }
        if !present.is_empty() {
            self.git.checkout_paths(target, &present)?;
        }
        if !added.is_empty() {
            debug!(count = added.len(), "removing files added after the checkpoint");
            self.git.remove_paths(&added)?;
        }
        Ok(())
    }

    fn log_noop(
        &self,
        checkpoint: &Checkpoint,
        current: &str,
        reason: &str,
    ) -> Result<RollbackLogEntry, CheckpointError> {
        let entry = RollbackLogEntry {
            subunit_id: checkpoint.subunit_id.clone(),
            timestamp: Utc::now(),
            from: current.to_string(),
            to: checkpoint.commit_ref.clone(),
            reason: reason.to_string(),
            files_affected: Vec::new(),
            success: true,
            error: None,
            outcome: RollbackOutcome::Noop,
        };
        self.append_log(entry.clone())?;
        info!(subunit_id = %checkpoint.subunit_id, "already at checkpoint");
        Ok(entry)
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    fn commits_path(&self) -> PathBuf {
        self.dir.join(COMMITS_FILE)
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join(ROLLBACK_LOG_FILE)
    }

    fn load_commits(&self) -> Result<CommitsDocument, CheckpointError> {
        Ok(read_json(&self.commits_path())?.unwrap_or_else(|| CommitsDocument {
            unit_id: self.unit_id.clone(),
            commits: BTreeMap::new(),
        }))
    }

    fn append_log(&self, entry: RollbackLogEntry) -> Result<(), CheckpointError> {
        let path = self.log_path();
        let mut doc: RollbackLogDocument = read_json(&path)?.unwrap_or_default();
        doc.rollbacks.push(entry);
        write_json(&path, &doc)?;
        Ok(())
    }

    fn to_checkpoint(&self, subunit_id: &str, record: &CommitRecord) -> Checkpoint {
        Checkpoint {
            unit_id: self.unit_id.clone(),
            subunit_id: subunit_id.to_string(),
            commit_ref: record.last_good.clone(),
            timestamp: record.timestamp,
            file_scope: record.files.clone(),
        }
    }
}

/// A path is in scope when it equals a scope entry or lies under one.
fn in_scope(path: &str, scope: &[String]) -> bool {
    scope.iter().any(|s| {
        let s = s.trim_end_matches('/');
        path == s || path.strip_prefix(s).is_some_and(|rest| rest.starts_with('/'))
    })
}

fn affected_files(changed: Vec<String>, status: &[StatusEntry]) -> Vec<String> {
    let mut all: BTreeSet<String> = changed.into_iter().collect();
    all.extend(
        status
            .iter()
            .filter(|s| !s.is_untracked())
            .map(|s| s.path.clone()),
    );
    all.into_iter().collect()
}
