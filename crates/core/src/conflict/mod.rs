//! Conflict parsing, classification and resolution.
//!
//! The conflict subsystem is responsible for:
//! 1. **Parsing** -- finding conflict marker blocks in a file's text.
//! 2. **Classification** -- deciding what kind of change each block holds.
//! 3. **Resolution** -- replacing blocks according to a strategy and staging
//!    the result.

pub mod classify;
pub mod merger;
pub mod parser;
pub mod resolver;

pub use classify::{classify, ConflictType};
pub use merger::{deep_merge_json, merge_json_documents, union_lines};
pub use parser::{has_conflict_markers, parse_conflict_markers, ConflictRegion};
pub use resolver::{ConflictResolver, ResolutionStrategy, ResolveOutcome};
