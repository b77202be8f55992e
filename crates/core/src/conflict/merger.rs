//! Pure resolution functions for classified conflict regions.
//!
//! Each function maps the two sides of a conflict to the replacement lines
//! (or document) without touching the filesystem.

use serde_json::Value;
use tracing::debug;

use super::classify::{version_token, ConflictType};
use super::parser::ConflictRegion;
use crate::errors::ConflictError;
use crate::git::Side;

/// Resolve a single region whose classification is line-based.
///
/// Returns `None` for classifications that are not resolved per region
/// (`json` is merged per file, the rest are not auto-resolvable).
pub fn resolve_region(conflict_type: ConflictType, region: &ConflictRegion) -> Option<Vec<String>> {
    match conflict_type {
        ConflictType::Whitespace => Some(region.theirs_lines.clone()),
        ConflictType::Imports => Some(union_lines(&region.ours_lines, &region.theirs_lines)),
        ConflictType::Version => {
            let side = newer_version_side(&region.ours_lines, &region.theirs_lines);
            debug!(?side, "version conflict resolved");
            Some(region.lines(side).to_vec())
        }
        _ => None,
    }
}

/// Ours then theirs, keeping the first occurrence of each line.
///
/// Lines compare equal when they match after trimming, so the same import
/// indented differently is kept once.
pub fn union_lines(ours: &[String], theirs: &[String]) -> Vec<String> {
    let mut seen: Vec<&str> = Vec::new();
    let mut out = Vec::new();
    for line in ours.iter().chain(theirs.iter()) {
        let key = line.trim();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(line.clone());
    }
    out
}

/// The side carrying the larger `major.minor.patch`; theirs on a tie.
///
/// Components compare numerically, so `1.10.0` is newer than `1.2.3`.
pub fn newer_version_side(ours: &[String], theirs: &[String]) -> Side {
    let ours_v = version_token(&ours.join("\n"));
    let theirs_v = version_token(&theirs.join("\n"));
    match (ours_v, theirs_v) {
        (Some(o), Some(t)) if o > t => Side::Ours,
        (Some(_), None) => Side::Ours,
        _ => Side::Theirs,
    }
}

/// Structural merge: objects recurse, everything else takes theirs.
pub fn deep_merge_json(ours: Value, theirs: Value) -> Value {
    match (ours, theirs) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, theirs_value) in overlay {
                let merged = match base.remove(&key) {
                    Some(ours_value) => deep_merge_json(ours_value, theirs_value),
                    None => theirs_value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, theirs) => theirs,
    }
}

/// Parse both full-file versions, deep-merge them and pretty-print the result.
pub fn merge_json_documents(file: &str, ours: &str, theirs: &str) -> Result<String, ConflictError> {
    let parse = |text: &str, side: &'static str| {
        serde_json::from_str::<Value>(text).map_err(|e| ConflictError::InvalidJson {
            file: file.to_string(),
            side,
            detail: e.to_string(),
        })
    };
    let merged = deep_merge_json(parse(ours, "ours")?, parse(theirs, "theirs")?);
    let mut out = serde_json::to_string_pretty(&merged).map_err(|e| ConflictError::InvalidJson {
        file: file.to_string(),
        side: "merged",
        detail: e.to_string(),
    })?;
    out.push('\n');
    Ok(out)
}
