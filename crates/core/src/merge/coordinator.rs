//! Merges unit branches back into the shared checkout.
//!
//! Every merge is preceded by a reversible probe (`merge --no-commit --no-ff`
//! followed by an abort). Only a clean probe lets the real merge run, and any
//! failure after that point restores the pre-merge HEAD before returning.

use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::audit::AuditLog;
use crate::config::{AppConfig, MergeConfig};
use crate::conflict::{ConflictResolver, ResolutionStrategy, ResolveOutcome};
use crate::errors::{GitError, MergeError, WorktreeError};
use crate::git::{GitCli, MergeFlags};
use crate::models::{
    MergeAuditEntry, MergeFlowState, MergeMode, MergeOptions, MergeReport, RemovalReport,
};
use crate::prompt::RegionChooser;
use crate::worktree::{validate_unit_id, WorkspaceRegistry};

/// Coordinates merges into the shared checkout's current branch.
///
/// Operations that move the shared HEAD or index take `&mut self`; hold one
/// coordinator per repository.
pub struct MergeCoordinator {
    git: GitCli,
    registry: WorkspaceRegistry,
    audit: AuditLog,
    merge_config: MergeConfig,
    resolver: ConflictResolver,
}

/// Per-attempt values shared by every audit entry of one call.
struct Attempt {
    id: String,
    unit_id: String,
    source_branch: String,
    target_branch: String,
    mode: MergeMode,
}

impl MergeCoordinator {
    pub fn new(config: &AppConfig) -> Self {
        let git = GitCli::new(&config.repo.path);
        Self {
            resolver: ConflictResolver::new(git.clone()),
            git,
            registry: WorkspaceRegistry::new(config),
            audit: AuditLog::new(config.audit_dir()),
            merge_config: config.merge.clone(),
        }
    }

    /// Use `chooser` for [`ResolutionStrategy::Interactive`].
    pub fn with_chooser(mut self, chooser: Box<dyn RegionChooser>) -> Self {
        self.resolver = ConflictResolver::with_chooser(self.git.clone(), chooser);
        self
    }

    pub fn registry(&self) -> &WorkspaceRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Conflict probe
    // -----------------------------------------------------------------------

    /// Paths that would conflict if the unit's branch were merged now.
    ///
    /// HEAD, index and working tree of the shared checkout are the same after
    /// the call as before it, whatever the outcome.
    #[instrument(skip(self), fields(repo = %self.git.work_dir().display()))]
    pub fn detect_conflicts(&mut self, unit_id: &str) -> Result<Vec<String>, MergeError> {
        let branch = self.unit_branch(unit_id)?;
        self.probe(&branch)
    }

    fn probe(&self, branch: &str) -> Result<Vec<String>, MergeError> {
        let pre = self.git.head_sha()?;
        let flags = MergeFlags {
            no_commit: true,
            no_ff: true,
            ..Default::default()
        };

        let outcome = match self.git.try_merge(branch, &flags) {
            Ok(o) => o,
            Err(e) => {
                self.restore(&pre, false)?;
                return Err(e.into());
            }
        };

        let conflicts = if outcome.success {
            Vec::new()
        } else {
            match self.collect_conflicts() {
                Ok(c) => c,
                Err(e) => {
                    self.restore(&pre, false)?;
                    return Err(e.into());
                }
            }
        };
        self.restore(&pre, false)?;

        if !outcome.success && conflicts.is_empty() {
            return Err(GitError::CommandFailed {
                args: format!("merge --no-commit --no-ff {}", branch),
                exit_code: outcome.exit_code,
                stderr: outcome.stderr.trim().to_string(),
            }
            .into());
        }

        debug!(branch, count = conflicts.len(), "probe finished");
        Ok(conflicts)
    }

    fn collect_conflicts(&self) -> Result<Vec<String>, GitError> {
        let files = self.git.diff_unmerged()?;
        if !files.is_empty() {
            return Ok(files);
        }
        self.git.unmerged_index()
    }

    /// Return the shared checkout to `pre`.
    ///
    /// An in-progress merge is aborted; if that fails, or `force_reset` is
    /// set, or HEAD moved, the checkout is reset hard to `pre`.
    fn restore(&self, pre: &str, force_reset: bool) -> Result<(), GitError> {
        let mut reset = force_reset;
        if self.git.is_merging()? {
            if let Err(e) = self.git.merge_abort() {
                warn!(error = %e, "merge --abort failed, resetting");
                reset = true;
            }
        }
        if reset || self.git.head_sha()? != pre {
            self.git.reset_hard(pre)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Merge
    // -----------------------------------------------------------------------

    /// Merge the unit's branch into the shared checkout's current branch.
    ///
    /// Writes exactly one audit entry per call, on every outcome, including
    /// an unknown unit. A unit branch already contained in the target fails
    /// with [`MergeError::NothingToMerge`] in every mode.
    #[instrument(skip(self, options), fields(repo = %self.git.work_dir().display(), mode = %options.mode()))]
    pub fn merge_to_base(
        &mut self,
        unit_id: &str,
        options: &MergeOptions,
    ) -> Result<MergeReport, MergeError> {
        self.exclude_audit_dir();
        let (target_branch, target_err) = match self.git.current_branch() {
            Ok(branch) => (branch, None),
            Err(e) => ("HEAD".to_string(), Some(e)),
        };
        let attempt = Attempt {
            id: Uuid::new_v4().to_string(),
            unit_id: unit_id.to_string(),
            source_branch: self.registry.branch_name(unit_id),
            target_branch,
            mode: options.mode(),
        };
        if let Some(e) = target_err {
            return Err(self.fail(&attempt, MergeFlowState::Failed, Vec::new(), e.into()));
        }
        if let Err(e) = self.unit_branch(unit_id) {
            return Err(self.fail(&attempt, MergeFlowState::Failed, Vec::new(), e));
        }
        info!(
            unit_id,
            source = %attempt.source_branch,
            target = %attempt.target_branch,
            "merge started"
        );

        let conflicts = match self.probe(&attempt.source_branch) {
            Ok(c) => c,
            Err(e) => return Err(self.fail(&attempt, MergeFlowState::Failed, Vec::new(), e)),
        };
        if !conflicts.is_empty() {
            let err = MergeError::ConflictDetected {
                unit_id: unit_id.to_string(),
                files: conflicts.clone(),
            };
            return Err(self.fail(&attempt, MergeFlowState::Conflicted, conflicts, err));
        }

        match self.git.is_ancestor(&attempt.source_branch, "HEAD") {
            Ok(false) => {}
            Ok(true) => {
                let err = MergeError::NothingToMerge {
                    unit_id: unit_id.to_string(),
                    branch: attempt.source_branch.clone(),
                };
                return Err(self.fail(&attempt, MergeFlowState::Failed, Vec::new(), err));
            }
            Err(e) => return Err(self.fail(&attempt, MergeFlowState::Failed, Vec::new(), e.into())),
        }

        let pre = match self.git.head_sha() {
            Ok(p) => p,
            Err(e) => return Err(self.fail(&attempt, MergeFlowState::Failed, Vec::new(), e.into())),
        };
        let message = options
            .message
            .clone()
            .unwrap_or_else(|| self.merge_config.render_message(unit_id, &attempt.source_branch));

        let commit_ref = match self.perform(&attempt, &message) {
            Ok(c) => c,
            Err(e) => {
                let squashed = matches!(attempt.mode, MergeMode::Squash | MergeMode::SquashStaged);
                if let Err(restore_err) = self.restore(&pre, squashed) {
                    warn!(error = %restore_err, "restore after failed merge also failed");
                }
                return Err(self.fail(&attempt, MergeFlowState::Failed, Vec::new(), e));
            }
        };

        let mut state = if commit_ref.is_some() {
            MergeFlowState::Committed
        } else {
            MergeFlowState::Staged
        };

        let mut removal: Option<RemovalReport> = None;
        let mut cleanup_error = None;
        if options.cleanup {
            match self.registry.remove(unit_id, true) {
                Ok(report) => {
                    state = MergeFlowState::CleanedUp;
                    removal = Some(report);
                }
                Err(WorktreeError::NotFound(_)) => {
                    cleanup_error = Some(format!("no workspace for unit '{}'", unit_id));
                }
                Err(e) => {
                    warn!(unit_id, error = %e, "cleanup after merge failed");
                    cleanup_error = Some(e.to_string());
                }
            }
        }

        let audit_file = self.record(&attempt, state, Vec::new(), commit_ref.clone(), None)?;
        info!(unit_id, %state, commit = ?commit_ref, "merge finished");

        Ok(MergeReport {
            unit_id: attempt.unit_id,
            source_branch: attempt.source_branch,
            target_branch: attempt.target_branch,
            mode: attempt.mode,
            state,
            commit_ref,
            removal,
            cleanup_error,
            audit_file,
        })
    }

    fn perform(&self, attempt: &Attempt, message: &str) -> Result<Option<String>, MergeError> {
        let branch = attempt.source_branch.as_str();
        match attempt.mode {
            MergeMode::Plain => {
                let flags = MergeFlags {
                    no_ff: true,
                    message: Some(message.to_string()),
                    ..Default::default()
                };
                self.git.merge(branch, &flags)?;
                Ok(Some(self.git.head_sha()?))
            }
            MergeMode::Staged => {
                let flags = MergeFlags {
                    no_commit: true,
                    no_ff: true,
                    ..Default::default()
                };
                self.git.merge(branch, &flags)?;
                Ok(None)
            }
            MergeMode::Squash | MergeMode::SquashStaged => {
                let flags = MergeFlags {
                    squash: true,
                    ..Default::default()
                };
                self.git.merge(branch, &flags)?;
                // Commits whose changes already reached the target squash to nothing.
                if !self.git.has_staged_changes()? {
                    return Err(MergeError::NothingToMerge {
                        unit_id: attempt.unit_id.clone(),
                        branch: branch.to_string(),
                    });
                }
                if attempt.mode == MergeMode::SquashStaged {
                    return Ok(None);
                }
                Ok(Some(self.git.commit(message)?))
            }
        }
    }

    /// Tool state written inside the shared checkout must not show up in
    /// its status.
    fn exclude_audit_dir(&self) {
        if let Err(e) = self.git.exclude_dir(self.audit.dir()) {
            warn!(dir = %self.audit.dir().display(), error = %e, "could not exclude audit directory");
        }
    }

    /// Record a failed attempt and hand back the error to return.
    fn fail(
        &self,
        attempt: &Attempt,
        state: MergeFlowState,
        conflicts: Vec<String>,
        err: MergeError,
    ) -> MergeError {
        warn!(unit_id = %attempt.unit_id, %state, error = %err, "merge did not complete");
        match self.record(attempt, state, conflicts, None, Some(err.to_string())) {
            Ok(_) => err,
            Err(audit_err) => {
                warn!(error = %audit_err, "failed to record merge audit entry");
                err
            }
        }
    }

    fn record(
        &self,
        attempt: &Attempt,
        state: MergeFlowState,
        conflicts: Vec<String>,
        commit_ref: Option<String>,
        error: Option<String>,
    ) -> Result<PathBuf, MergeError> {
        let entry = MergeAuditEntry {
            id: attempt.id.clone(),
            unit_id: attempt.unit_id.clone(),
            source_branch: attempt.source_branch.clone(),
            target_branch: attempt.target_branch.clone(),
            mode: attempt.mode,
            state,
            conflicts,
            commit_ref,
            success: error.is_none(),
            error,
            timestamp: Utc::now(),
        };
        Ok(self.audit.record(&entry)?)
    }

    // -----------------------------------------------------------------------
    // History and recovery
    // -----------------------------------------------------------------------

    /// Audit entries, newest first.
    pub fn merge_history(&self, unit_id: Option<&str>) -> Result<Vec<MergeAuditEntry>, MergeError> {
        Ok(self.audit.entries(unit_id)?)
    }

    /// Undo a merge left behind by an interrupted git process.
    #[instrument(skip(self), fields(repo = %self.git.work_dir().display()))]
    pub fn abort_in_progress(&mut self) -> Result<(), MergeError> {
        if self.git.is_merging()? {
            self.git.merge_abort()?;
        } else {
            self.git.reset_hard("HEAD")?;
        }
        info!("shared checkout restored");
        Ok(())
    }

    /// Resolve conflicted paths in the shared checkout.
    ///
    /// With no `paths`, every currently unmerged path is resolved.
    pub fn resolve_conflicts(
        &mut self,
        strategy: ResolutionStrategy,
        paths: &[String],
    ) -> Result<Vec<ResolveOutcome>, MergeError> {
        let targets = if paths.is_empty() {
            self.git.diff_unmerged()?
        } else {
            paths.to_vec()
        };
        let mut outcomes = Vec::with_capacity(targets.len());
        for file in &targets {
            outcomes.push(self.resolver.resolve(strategy, file)?);
        }
        Ok(outcomes)
    }

    fn unit_branch(&self, unit_id: &str) -> Result<String, MergeError> {
        validate_unit_id(unit_id)?;
        let branch = self.registry.branch_name(unit_id);
        if !self.git.branch_exists(&branch)? {
            return Err(WorktreeError::NotFound(unit_id.to_string()).into());
        }
        Ok(branch)
    }
}
