//! Append-only merge audit trail: one JSON file per merge attempt.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::models::MergeAuditEntry;
use crate::store::{read_json, write_json_new};

#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `entry` to a new file; existing files are never overwritten.
    pub fn record(&self, entry: &MergeAuditEntry) -> Result<PathBuf, StoreError> {
        let stem = format!(
            "merge-{}-{}",
            file_safe(&entry.unit_id),
            timestamp_slug(entry.timestamp)
        );
        let path = write_json_new(&self.dir, &stem, entry)?;
        debug!(path = %path.display(), state = %entry.state, "merge audit recorded");
        Ok(path)
    }

    /// Recorded entries, newest first, optionally for one unit only.
    ///
    /// Files that cannot be parsed are skipped with a warning.
    pub fn entries(&self, unit_id: Option<&str>) -> Result<Vec<MergeAuditEntry>, StoreError> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut found: Vec<(String, MergeAuditEntry)> = Vec::new();
        for dirent in read_dir {
            let dirent = dirent.map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let name = dirent.file_name().to_string_lossy().to_string();
            if !name.starts_with("merge-") || !name.ends_with(".json") {
                continue;
            }
            let path = dirent.path();
            match read_json::<MergeAuditEntry>(&path) {
                Ok(Some(entry)) => {
                    if unit_id.map_or(true, |u| entry.unit_id == u) {
                        found.push((name, entry));
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable audit file"),
            }
        }

        // Same-millisecond collisions fall back to the file suffix order.
        found.sort_by(|(name_a, a), (name_b, b)| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| suffix_of(name_b).cmp(&suffix_of(name_a)))
        });
        Ok(found.into_iter().map(|(_, e)| e).collect())
    }
}

/// RFC 3339 with millisecond precision, `:` and `.` replaced by `-`.
pub fn timestamp_slug(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// Rejected unit ids are audited too; keep them from escaping the directory.
fn file_safe(unit_id: &str) -> String {
    let safe: String = unit_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() || safe.starts_with('.') {
        format!("_{}", safe)
    } else {
        safe
    }
}

fn suffix_of(file_name: &str) -> u32 {
    // merge-<unit>-<YYYY-MM-DDTHH-MM-SS-mmmZ>[-N].json
    let stem = file_name.trim_end_matches(".json");
    match stem.rsplit_once('-') {
        Some((head, n)) if head.ends_with('Z') => n.parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MergeFlowState, MergeMode};
    use chrono::{Duration, TimeZone};

    fn entry(unit: &str, ts: DateTime<Utc>, id: &str) -> MergeAuditEntry {
        MergeAuditEntry {
            id: id.into(),
            unit_id: unit.into(),
            source_branch: format!("story/{}", unit),
            target_branch: "main".into(),
            mode: MergeMode::Plain,
            state: MergeFlowState::Committed,
            conflicts: vec![],
            commit_ref: None,
            success: true,
            error: None,
            timestamp: ts,
        }
    }

    #[test]
    fn test_timestamp_slug() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap() + Duration::milliseconds(42);
        assert_eq!(timestamp_slug(ts), "2024-03-05T14-07-09-042Z");
    }

    #[test]
    fn test_suffix_of() {
        assert_eq!(suffix_of("merge-s1-2024-03-05T14-07-09-042Z.json"), 0);
        assert_eq!(suffix_of("merge-s1-2024-03-05T14-07-09-042Z-2.json"), 2);
    }

    #[test]
    fn test_record_and_history_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path());
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        log.record(&entry("a", t0, "1")).unwrap();
        log.record(&entry("b", t0 + Duration::seconds(5), "2")).unwrap();
        log.record(&entry("a", t0 + Duration::seconds(9), "3")).unwrap();

        let all = log.entries(None).unwrap();
        let ids: Vec<&str> = all.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2", "1"]);

        let only_a = log.entries(Some("a")).unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|e| e.unit_id == "a"));
    }

    #[test]
    fn test_same_millisecond_records_do_not_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path());
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let first = log.record(&entry("a", t0, "1")).unwrap();
        let second = log.record(&entry("a", t0, "2")).unwrap();
        assert_ne!(first, second);

        let ids: Vec<String> = log.entries(None).unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[test]
    fn test_rejected_unit_ids_stay_inside_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path());
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let path = log.record(&entry("../escape", t0, "1")).unwrap();
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(file_safe("../escape"), "_.._escape");
        assert_eq!(file_safe(""), "_");

        let all = log.entries(Some("../escape")).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_missing_dir_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("nope"));
        assert!(log.entries(None).unwrap().is_empty());
    }
}
