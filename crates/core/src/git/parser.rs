//! Parsers for git porcelain output.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::GitError;

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub head: Option<String>,
    /// Short branch name (`refs/heads/` stripped); `None` when detached.
    pub branch: Option<String>,
    pub bare: bool,
    pub locked: bool,
    pub prunable: bool,
}

/// One entry of `git status --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    /// Two-letter XY status code, e.g. ` M`, `??`, `UU`.
    pub code: String,
    pub path: String,
}

impl StatusEntry {
    /// Whether git does not track this path at all.
    pub fn is_untracked(&self) -> bool {
        self.code == "??"
    }

    /// Whether this entry is an unmerged (conflicted) path.
    pub fn is_unmerged(&self) -> bool {
        matches!(
            self.code.as_str(),
            "DD" | "AU" | "UD" | "UA" | "DU" | "AA" | "UU"
        )
    }
}

pub fn parse_worktree_list(output: &str) -> Result<Vec<WorktreeEntry>, GitError> {
    debug!("parsing worktree list ({} bytes)", output.len());
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in output.lines() {
        if line.is_empty() {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            continue;
        }

        let (key, value) = match line.split_once(' ') {
            Some((k, v)) => (k, Some(v)),
            None => (line, None),
        };

        if key == "worktree" {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            let path = value.ok_or_else(|| GitError::UnexpectedOutput {
                command: "worktree list --porcelain".into(),
                detail: "worktree line without a path".into(),
            })?;
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                head: None,
                branch: None,
                bare: false,
                locked: false,
                prunable: false,
            });
            continue;
        }

        let Some(entry) = current.as_mut() else {
            warn!(line, "worktree attribute before any worktree line");
            continue;
        };

        match key {
            "HEAD" => entry.head = value.map(str::to_string),
            "branch" => {
                entry.branch = value.map(|v| v.strip_prefix("refs/heads/").unwrap_or(v).to_string())
            }
            "bare" => entry.bare = true,
            "locked" => entry.locked = true,
            "prunable" => entry.prunable = true,
            // "detached" and future attributes carry nothing we track.
            _ => {}
        }
    }

    if let Some(entry) = current.take() {
        entries.push(entry);
    }
    Ok(entries)
}

pub fn parse_status_porcelain(output: &str) -> Vec<StatusEntry> {
    output
        .lines()
        .filter(|l| l.len() > 3)
        .map(|line| {
            let code = line[..2].to_string();
            let mut path = line[3..].to_string();
            // Renames are reported as "old -> new"; the new path is what exists.
            if let Some((_, to)) = path.split_once(" -> ") {
                path = to.to_string();
            }
            StatusEntry {
                code,
                path: unquote(&path),
            }
        })
        .collect()
}

/// Paths from `git ls-files -u` (one line per stage), de-duplicated in order.
pub fn parse_unmerged_index(output: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for line in output.lines() {
        let Some((_, path)) = line.split_once('\t') else {
            continue;
        };
        let path = unquote(path);
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

/// Non-empty lines of a `--name-only` style listing.
pub fn parse_name_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(unquote)
        .collect()
}

/// Strip the C-style quoting git applies to paths with special characters.
fn unquote(path: &str) -> String {
    let Some(inner) = path.strip_prefix('"').and_then(|p| p.strip_suffix('"')) else {
        return path.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worktree_list() {
        let output = "worktree /repo\nHEAD 1111111111111111111111111111111111111111\nbranch refs/heads/main\n\n\
worktree /repo/.worktrees/s1\nHEAD 2222222222222222222222222222222222222222\nbranch refs/heads/story/s1\nlocked\n\n\
worktree /tmp/detached\nHEAD 3333333333333333333333333333333333333333\ndetached\nprunable gitdir file points to non-existent location\n";
        let entries = parse_worktree_list(output).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].path, PathBuf::from("/repo/.worktrees/s1"));
        assert_eq!(entries[1].branch.as_deref(), Some("story/s1"));
        assert!(entries[1].locked);
        assert!(entries[2].branch.is_none());
        assert!(entries[2].prunable);
    }

    #[test]
    fn test_parse_worktree_list_bare() {
        let entries = parse_worktree_list("worktree /srv/repo.git\nbare\n").unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].bare);
    }

    #[test]
    fn test_parse_status_porcelain() {
        let output = " M src/lib.rs\n?? notes.txt\nR  old.rs -> new.rs\nUU \"with space.txt\"\n";
        let entries = parse_status_porcelain(output);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].code, " M");
        assert_eq!(entries[2].path, "new.rs");
        assert_eq!(entries[3].path, "with space.txt");
        assert!(entries[3].is_unmerged());
        assert!(!entries[0].is_unmerged());
        assert!(entries[1].is_untracked());
        assert!(!entries[0].is_untracked());
    }

    #[test]
    fn test_parse_unmerged_index_dedupes_stages() {
        let output = "100644 aaa 1\tconfig.json\n100644 bbb 2\tconfig.json\n100644 ccc 3\tconfig.json\n100644 ddd 2\tsrc/a.rs\n";
        assert_eq!(
            parse_unmerged_index(output),
            vec!["config.json".to_string(), "src/a.rs".to_string()]
        );
    }

    #[test]
    fn test_parse_name_list() {
        assert_eq!(parse_name_list("a.txt\n\nb/c.txt\n"), vec!["a.txt", "b/c.txt"]);
        assert!(parse_name_list("").is_empty());
    }
}
