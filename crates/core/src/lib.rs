//! gitstory core library.
//!
//! Runs several units of work in parallel against one git repository: each
//! unit gets its own linked worktree on a dedicated branch, finished units are
//! merged back through a conflict probe, and subunits can record checkpoints
//! and roll back to them.
//!
//! Everything is driven through the `git` command line, one blocking command
//! at a time.

pub mod checkpoint;
pub mod config;
pub mod conflict;
pub mod errors;
pub mod git;
pub mod logging;
pub mod merge;
pub mod models;
pub mod prompt;
pub mod store;
pub mod worktree;

// Re-exports for convenience.
pub use checkpoint::CheckpointStore;
pub use config::AppConfig;
pub use conflict::{ConflictResolver, ResolutionStrategy};
pub use errors::CoreError;
pub use git::GitCli;
pub use merge::MergeCoordinator;
pub use worktree::WorkspaceRegistry;
