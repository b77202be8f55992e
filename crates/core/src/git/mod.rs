//! Git command client and porcelain parsers.

pub mod client;
pub mod parser;

pub use client::{CommandOutcome, GitCli, MergeFlags, Side};
pub use parser::{StatusEntry, WorktreeEntry};
