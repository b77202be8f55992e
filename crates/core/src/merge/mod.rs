//! Conflict probing, merging back into the shared branch and the merge audit
//! trail.

pub mod audit;
pub mod coordinator;

pub use audit::AuditLog;
pub use coordinator::MergeCoordinator;
