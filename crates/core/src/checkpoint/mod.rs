//! Subunit checkpoints and rollback.

pub mod store;

pub use store::CheckpointStore;
