//! Domain model types shared by the registry, coordinator and checkpoint store.
//!
//! Persisted types serialize with camelCase keys; these are the on-disk formats.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Workspaces
// ---------------------------------------------------------------------------

/// An isolated checkout bound to the branch of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub unit_id: String,
    pub path: PathBuf,
    pub branch_name: String,
    pub created_at: DateTime<Utc>,
    pub uncommitted_change_count: usize,
    pub status: WorkspaceStatus,
}

impl Workspace {
    pub fn is_dirty(&self) -> bool {
        self.uncommitted_change_count > 0
    }
}

/// Staleness of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Active,
    Stale,
}

impl std::fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

/// Result of removing a workspace.
///
/// Branch deletion is best effort: a refusal (e.g. unmerged commits) is
/// reported in `branch_warning` and the removal still succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalReport {
    pub unit_id: String,
    pub path: PathBuf,
    pub branch_name: String,
    pub branch_deleted: bool,
    pub branch_warning: Option<String>,
}

// ---------------------------------------------------------------------------
// Merges
// ---------------------------------------------------------------------------

/// How the unit branch is folded into the target branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeMode {
    /// Merge commit created immediately.
    Plain,
    /// Merge result left in the index, uncommitted.
    Staged,
    /// Unit commits folded into one commit.
    Squash,
    /// Unit commits folded into one pending, uncommitted change.
    SquashStaged,
}

impl std::fmt::Display for MergeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Staged => write!(f, "staged"),
            Self::Squash => write!(f, "squash"),
            Self::SquashStaged => write!(f, "squash-staged"),
        }
    }
}

/// Merge flow state of one unit.
///
/// `New → DetectingConflicts → Conflicted | Merging → Committed | Staged |
/// Failed`, optionally followed by `CleanedUp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeFlowState {
    New,
    DetectingConflicts,
    Conflicted,
    Merging,
    Committed,
    Staged,
    Failed,
    CleanedUp,
}

impl MergeFlowState {
    /// Terminal states from which the same unit may be merged again.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Conflicted | Self::Failed)
    }
}

impl std::fmt::Display for MergeFlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::DetectingConflicts => write!(f, "detecting_conflicts"),
            Self::Conflicted => write!(f, "conflicted"),
            Self::Merging => write!(f, "merging"),
            Self::Committed => write!(f, "committed"),
            Self::Staged => write!(f, "staged"),
            Self::Failed => write!(f, "failed"),
            Self::CleanedUp => write!(f, "cleaned_up"),
        }
    }
}

/// Caller options for a merge back into the shared branch.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Leave the result in the index without committing.
    pub staged: bool,
    /// Fold the unit's commits into a single change.
    pub squash: bool,
    /// Remove the workspace after a successful merge.
    pub cleanup: bool,
    /// Commit message; the configured template is used when `None`.
    pub message: Option<String>,
}

impl MergeOptions {
    pub fn mode(&self) -> MergeMode {
        match (self.squash, self.staged) {
            (false, false) => MergeMode::Plain,
            (false, true) => MergeMode::Staged,
            (true, false) => MergeMode::Squash,
            (true, true) => MergeMode::SquashStaged,
        }
    }
}

/// Persisted record of one merge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeAuditEntry {
    pub id: String,
    pub unit_id: String,
    pub source_branch: String,
    pub target_branch: String,
    pub mode: MergeMode,
    pub state: MergeFlowState,
    pub conflicts: Vec<String>,
    pub commit_ref: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Returned by a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub unit_id: String,
    pub source_branch: String,
    pub target_branch: String,
    pub mode: MergeMode,
    pub state: MergeFlowState,
    /// New HEAD when a commit was created.
    pub commit_ref: Option<String>,
    /// Workspace removal details when cleanup ran.
    pub removal: Option<RemovalReport>,
    /// Why cleanup was skipped or failed, when requested.
    pub cleanup_error: Option<String>,
    pub audit_file: PathBuf,
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// The last known good position of a subunit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub unit_id: String,
    pub subunit_id: String,
    pub commit_ref: String,
    pub timestamp: DateTime<Utc>,
    pub file_scope: Vec<String>,
}

impl Checkpoint {
    /// Targeted checkpoints restore only their file scope.
    pub fn is_targeted(&self) -> bool {
        !self.file_scope.is_empty()
    }
}

/// Caller options for a rollback.
#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Skip the confirmation prompt.
    pub hard: bool,
    /// Free-text reason recorded in the rollback log.
    pub reason: String,
}

/// What a rollback attempt ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// Already at the checkpoint; nothing changed.
    Noop,
    /// Scoped files restored to their checkpoint content.
    Restored,
    /// Branch position reset to the checkpoint.
    Reset,
    /// Confirmation declined.
    Cancelled,
    /// A git step failed.
    Failed,
}

impl std::fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Noop => write!(f, "no-op"),
            Self::Restored => write!(f, "restored"),
            Self::Reset => write!(f, "reset"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Kind of mutation a rollback performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackOperation {
    /// `checkout <ref> -- <paths>`; history untouched.
    RestoreFiles,
    /// `reset --hard <ref>`.
    ResetBranch,
}

impl std::fmt::Display for RollbackOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RestoreFiles => write!(f, "targeted file restore"),
            Self::ResetBranch => write!(f, "full reset"),
        }
    }
}

/// What a pending rollback would do; shown before confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackSummary {
    pub subunit_id: String,
    pub current_ref: String,
    pub target_ref: String,
    pub files: Vec<String>,
    pub operation: RollbackOperation,
    pub reason: String,
}

impl std::fmt::Display for RollbackSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Rollback of subunit '{}' ({})", self.subunit_id, self.operation)?;
        writeln!(f, "  current : {}", short_ref(&self.current_ref))?;
        writeln!(f, "  target  : {}", short_ref(&self.target_ref))?;
        if !self.reason.is_empty() {
            writeln!(f, "  reason  : {}", self.reason)?;
        }
        if self.files.is_empty() {
            write!(f, "  files   : (none)")
        } else {
            write!(f, "  files   : {}", self.files.join(", "))
        }
    }
}

fn short_ref(r: &str) -> &str {
    if r.len() > 12 && r.chars().all(|c| c.is_ascii_hexdigit()) {
        &r[..12]
    } else {
        r
    }
}

/// One line of the append-only rollback log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackLogEntry {
    pub subunit_id: String,
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub reason: String,
    pub files_affected: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
    pub outcome: RollbackOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_mode_from_options() {
        let mut opts = MergeOptions::default();
        assert_eq!(opts.mode(), MergeMode::Plain);
        opts.staged = true;
        assert_eq!(opts.mode(), MergeMode::Staged);
        opts.squash = true;
        assert_eq!(opts.mode(), MergeMode::SquashStaged);
        opts.staged = false;
        assert_eq!(opts.mode(), MergeMode::Squash);
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(WorkspaceStatus::Stale.to_string(), "stale");
        assert_eq!(MergeMode::SquashStaged.to_string(), "squash-staged");
        assert_eq!(
            MergeFlowState::DetectingConflicts.to_string(),
            "detecting_conflicts"
        );
        assert_eq!(RollbackOutcome::Noop.to_string(), "no-op");
    }

    #[test]
    fn test_retryable_states() {
        assert!(MergeFlowState::Conflicted.is_retryable());
        assert!(MergeFlowState::Failed.is_retryable());
        assert!(!MergeFlowState::Committed.is_retryable());
    }

    #[test]
    fn test_audit_entry_json_keys() {
        let entry = MergeAuditEntry {
            id: "id-1".into(),
            unit_id: "s1".into(),
            source_branch: "story/s1".into(),
            target_branch: "main".into(),
            mode: MergeMode::Plain,
            state: MergeFlowState::Committed,
            conflicts: vec![],
            commit_ref: Some("abc".into()),
            success: true,
            error: None,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["unitId"], "s1");
        assert_eq!(json["sourceBranch"], "story/s1");
        assert_eq!(json["commitRef"], "abc");
        assert_eq!(json["state"], "committed");
    }

    #[test]
    fn test_rollback_summary_display() {
        let summary = RollbackSummary {
            subunit_id: "step-2".into(),
            current_ref: "0123456789abcdef0123456789abcdef01234567".into(),
            target_ref: "fedcba9876543210fedcba9876543210fedcba98".into(),
            files: vec!["src/a.rs".into(), "src/b.rs".into()],
            operation: RollbackOperation::RestoreFiles,
            reason: "lint failed".into(),
        };
        let text = summary.to_string();
        assert!(text.contains("targeted file restore"));
        assert!(text.contains("current : 0123456789ab\n"));
        assert!(text.contains("src/a.rs, src/b.rs"));
    }

    #[test]
    fn test_rollback_entry_json_keys() {
        let entry = RollbackLogEntry {
            subunit_id: "step-1".into(),
            timestamp: Utc::now(),
            from: "a".into(),
            to: "b".into(),
            reason: "tests failed".into(),
            files_affected: vec!["x.rs".into()],
            success: true,
            error: None,
            outcome: RollbackOutcome::Reset,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["subunitId"], "step-1");
        assert_eq!(json["filesAffected"][0], "x.rs");
        assert_eq!(json["outcome"], "reset");
    }
}
