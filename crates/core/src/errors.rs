//! Error types for the gitstory core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use std::path::PathBuf;

use thiserror::Error;

use crate::conflict::ConflictType;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Worktree(#[from] WorktreeError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from `git` CLI invocations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The `git` binary was not found on `$PATH`.
    #[error("git binary not found: {0}")]
    BinaryNotFound(String),

    /// A `git` command exited with a non-zero status.
    #[error("git {args} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        args: String,
        exit_code: i32,
        stderr: String,
    },

    /// Output of a porcelain command could not be understood.
    #[error("unexpected git output from '{command}': {detail}")]
    UnexpectedOutput { command: String, detail: String },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GitError {
    /// Diagnostic text of a failed command, if this is one.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { stderr, .. } => Some(stderr.as_str()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Worktree errors
// ---------------------------------------------------------------------------

/// Errors from the workspace registry.
#[derive(Debug, Error)]
pub enum WorktreeError {
    /// A workspace (or its directory or branch) already exists for the unit.
    #[error("workspace for unit '{unit_id}' already exists: {detail}")]
    AlreadyExists { unit_id: String, detail: String },

    /// Admitting another workspace would exceed the configured capacity.
    #[error("workspace capacity exceeded ({active} active, max {max})")]
    CapacityExceeded { active: usize, max: usize },

    /// The workspace has uncommitted changes and removal was not forced.
    #[error("workspace for unit '{unit_id}' has {changes} uncommitted change(s)")]
    DirtyWorkspace { unit_id: String, changes: usize },

    /// No workspace exists for the unit.
    #[error("no workspace for unit '{0}'")]
    NotFound(String),

    /// The unit id cannot be used as a directory and branch name.
    #[error("invalid unit id '{unit_id}': {reason}")]
    InvalidUnitId { unit_id: String, reason: String },

    /// Underlying git failure.
    #[error("worktree git error: {0}")]
    Git(#[from] GitError),

    /// Filesystem failure on the workspace directory.
    #[error("worktree I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Errors from the merge coordinator.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The trial merge found conflicting paths. Retryable after a fix.
    #[error("merge of unit '{unit_id}' would conflict in {} file(s): {}", .files.len(), .files.join(", "))]
    ConflictDetected { unit_id: String, files: Vec<String> },

    /// The unit branch brings no change the target does not already have.
    #[error("unit '{unit_id}' has nothing to merge: {branch} is already in the target")]
    NothingToMerge { unit_id: String, branch: String },

    /// Workspace lookup or cleanup failed.
    #[error("merge workspace error: {0}")]
    Worktree(#[from] WorktreeError),

    /// A git step failed; the shared checkout has been restored.
    #[error("merge git error: {0}")]
    Git(#[from] GitError),

    /// Conflict resolution on the shared checkout failed.
    #[error("merge conflict resolution error: {0}")]
    Conflict(#[from] ConflictError),

    /// The audit trail could not be written or read.
    #[error("merge audit error: {0}")]
    Audit(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from conflict analysis and resolution.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// Automatic resolution does not handle this classification.
    #[error("cannot auto-resolve {conflict_type} conflict in '{file}'")]
    UnresolvableConflictType {
        file: String,
        conflict_type: ConflictType,
    },

    /// One side of a JSON conflict is not valid JSON.
    #[error("invalid JSON on the {side} side of '{file}': {detail}")]
    InvalidJson {
        file: String,
        side: &'static str,
        detail: String,
    },

    /// The interactive chooser could not obtain a decision.
    #[error("conflict prompt failed: {0}")]
    Prompt(String),

    /// Underlying git failure (checkout of a side, staging).
    #[error("conflict git error: {0}")]
    Git(#[from] GitError),

    /// Reading or writing the conflicted file failed.
    #[error("conflict I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Checkpoint errors
// ---------------------------------------------------------------------------

/// Errors from the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// No checkpoint recorded for the subunit.
    #[error("no checkpoint for subunit '{0}'")]
    NotFound(String),

    /// The unit id cannot be used as a state directory name.
    #[error("invalid unit id '{unit_id}': {reason}")]
    InvalidUnitId { unit_id: String, reason: String },

    /// The operator declined the rollback confirmation.
    #[error("rollback of subunit '{0}' cancelled")]
    Cancelled(String),

    /// The confirmation prompt itself failed.
    #[error("rollback prompt failed: {0}")]
    Prompt(String),

    /// Underlying git failure.
    #[error("checkpoint git error: {0}")]
    Git(#[from] GitError),

    /// The checkpoint file or rollback log could not be accessed.
    #[error("checkpoint store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors from JSON file persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading, writing or renaming a file failed.
    #[error("store I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file did not contain the expected JSON document.
    #[error("store JSON error at '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
