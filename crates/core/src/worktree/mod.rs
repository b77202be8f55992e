//! Isolated per-unit workspaces backed by `git worktree`.

pub mod registry;

pub use registry::{validate_unit_id, WorkspaceRegistry};
