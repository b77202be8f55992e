//! Blocking `git` CLI client.
//!
//! Every operation is a single sequential `git` invocation; the next command is
//! never issued before the previous one returns. A non-zero exit becomes
//! [`GitError::CommandFailed`] carrying the raw diagnostic text.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::{debug, info, instrument, warn};

use super::parser::{
    parse_name_list, parse_status_porcelain, parse_unmerged_index, parse_worktree_list,
    StatusEntry, WorktreeEntry,
};
use crate::errors::GitError;

/// Which side of a conflicted path to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Ours,
    Theirs,
}

impl Side {
    fn flag(self) -> &'static str {
        match self {
            Side::Ours => "--ours",
            Side::Theirs => "--theirs",
        }
    }
}

/// Flags for a single `git merge` invocation.
#[derive(Debug, Clone, Default)]
pub struct MergeFlags {
    pub no_commit: bool,
    pub no_ff: bool,
    pub squash: bool,
    pub message: Option<String>,
}

/// Raw result of a command whose non-zero exit is an expected outcome.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Client for one git working directory (the shared checkout or a workspace).
#[derive(Debug, Clone)]
pub struct GitCli {
    work_dir: PathBuf,
}

impl GitCli {
    /// Create a client that runs every command inside `work_dir`.
    pub fn new<P: AsRef<Path>>(work_dir: P) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
        }
    }

    /// Open the repository containing `path`, rooted at its top-level directory.
    pub fn discover<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let probe = Self::new(path);
        let top = probe.run(&["rev-parse", "--show-toplevel"])?;
        let top = PathBuf::from(top.trim());
        info!(path = %top.display(), "opened git repository");
        Ok(Self::new(top))
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// A client for another directory, e.g. a workspace checkout.
    pub fn at<P: AsRef<Path>>(&self, dir: P) -> Self {
        Self::new(dir)
    }

    // -----------------------------------------------------------------------
    // Refs
    // -----------------------------------------------------------------------

    /// Resolve a revision to its full commit id.
    pub fn rev_parse(&self, rev: &str) -> Result<String, GitError> {
        let spec = format!("{}^{{commit}}", rev);
        let out = self.run(&["rev-parse", "--verify", "--quiet", &spec])?;
        Ok(out.trim().to_string())
    }

    pub fn head_sha(&self) -> Result<String, GitError> {
        self.rev_parse("HEAD")
    }

    /// Current branch name, or `HEAD` when detached.
    pub fn current_branch(&self) -> Result<String, GitError> {
        let out = self.run(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    pub fn branch_exists(&self, name: &str) -> Result<bool, GitError> {
        let refname = format!("refs/heads/{}", name);
        let outcome = self.run_allow_failure(&["rev-parse", "--verify", "--quiet", &refname])?;
        Ok(outcome.success)
    }

    /// Whether `ancestor` is reachable from `rev`.
    pub fn is_ancestor(&self, ancestor: &str, rev: &str) -> Result<bool, GitError> {
        let outcome = self.run_allow_failure(&["merge-base", "--is-ancestor", ancestor, rev])?;
        match outcome.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(GitError::CommandFailed {
                args: format!("merge-base --is-ancestor {} {}", ancestor, rev),
                exit_code: code,
                stderr: outcome.stderr,
            }),
        }
    }

    /// Whether `path` (relative to the top of the tree) exists in `rev`.
    pub fn exists_at(&self, rev: &str, path: &str) -> Result<bool, GitError> {
        let path = path.trim_start_matches("./").trim_end_matches('/');
        let object = format!("{}:{}", rev, path);
        let outcome = self.run_allow_failure(&["cat-file", "-e", &object])?;
        Ok(outcome.success)
    }

    /// Whether a merge is in progress (MERGE_HEAD exists).
    pub fn is_merging(&self) -> Result<bool, GitError> {
        let outcome = self.run_allow_failure(&["rev-parse", "--verify", "--quiet", "MERGE_HEAD"])?;
        Ok(outcome.success)
    }

    // -----------------------------------------------------------------------
    // Branches and worktrees
    // -----------------------------------------------------------------------

    #[instrument(skip(self), fields(dir = %self.work_dir.display()))]
    pub fn create_branch(&self, name: &str, start_point: &str) -> Result<(), GitError> {
        self.run(&["branch", name, start_point])?;
        info!(name, start_point, "created branch");
        Ok(())
    }

    /// Delete a local branch; `force` uses `-D` and drops unmerged commits.
    #[instrument(skip(self), fields(dir = %self.work_dir.display()))]
    pub fn delete_branch(&self, name: &str, force: bool) -> Result<(), GitError> {
        let flag = if force { "-D" } else { "-d" };
        self.run(&["branch", flag, name])?;
        info!(name, force, "deleted branch");
        Ok(())
    }

    /// `git worktree add -b <branch> <path> <start_point>`.
    #[instrument(skip(self), fields(dir = %self.work_dir.display(), path = %path.display()))]
    pub fn worktree_add(&self, path: &Path, branch: &str, start_point: &str) -> Result<(), GitError> {
        let path_str = path.to_string_lossy().to_string();
        self.run(&["worktree", "add", "-b", branch, &path_str, start_point])?;
        info!(branch, "worktree added");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %self.work_dir.display(), path = %path.display()))]
    pub fn worktree_remove(&self, path: &Path, force: bool) -> Result<(), GitError> {
        let path_str = path.to_string_lossy().to_string();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_str);
        self.run(&args)?;
        info!("worktree removed");
        Ok(())
    }

    pub fn worktree_list(&self) -> Result<Vec<WorktreeEntry>, GitError> {
        let out = self.run(&["worktree", "list", "--porcelain"])?;
        parse_worktree_list(&out)
    }

    pub fn worktree_prune(&self) -> Result<(), GitError> {
        self.run(&["worktree", "prune"])?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Merging
    // -----------------------------------------------------------------------

    /// Run `git merge`; a non-zero exit (conflicts included) is an error.
    #[instrument(skip(self, flags), fields(dir = %self.work_dir.display()))]
    pub fn merge(&self, branch: &str, flags: &MergeFlags) -> Result<(), GitError> {
        let args = merge_args(branch, flags);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&refs)?;
        info!(branch, "merge completed");
        Ok(())
    }

    /// Run `git merge` and report the outcome instead of failing on conflicts.
    pub fn try_merge(&self, branch: &str, flags: &MergeFlags) -> Result<CommandOutcome, GitError> {
        let args = merge_args(branch, flags);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_allow_failure(&refs)
    }

    pub fn merge_abort(&self) -> Result<(), GitError> {
        self.run(&["merge", "--abort"])?;
        debug!("merge aborted");
        Ok(())
    }

    /// Paths with unresolved conflicts, via `diff --name-only --diff-filter=U`.
    pub fn diff_unmerged(&self) -> Result<Vec<String>, GitError> {
        let out = self.run(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(parse_name_list(&out))
    }

    /// Paths with unmerged index entries, via `ls-files -u`.
    pub fn unmerged_index(&self) -> Result<Vec<String>, GitError> {
        let out = self.run(&["ls-files", "-u"])?;
        Ok(parse_unmerged_index(&out))
    }

    /// Tracked files under `paths` that did not exist in `rev`.
    pub fn added_since(&self, rev: &str, paths: &[String]) -> Result<Vec<String>, GitError> {
        let mut args = vec!["diff", "--name-only", "--no-renames", "--diff-filter=A", rev, "--"];
        args.extend(paths.iter().map(String::as_str));
        let out = self.run(&args)?;
        Ok(parse_name_list(&out))
    }

    /// Whether the index differs from HEAD.
    pub fn has_staged_changes(&self) -> Result<bool, GitError> {
        let outcome = self.run_allow_failure(&["diff", "--cached", "--quiet"])?;
        match outcome.exit_code {
            0 => Ok(false),
            1 => Ok(true),
            code => Err(GitError::CommandFailed {
                args: "diff --cached --quiet".into(),
                exit_code: code,
                stderr: outcome.stderr,
            }),
        }
    }

    /// Files that differ between two revisions.
    pub fn diff_names(&self, from: &str, to: &str) -> Result<Vec<String>, GitError> {
        let out = self.run(&["diff", "--name-only", from, to])?;
        Ok(parse_name_list(&out))
    }

    // -----------------------------------------------------------------------
    // Index and working tree
    // -----------------------------------------------------------------------

    /// `git checkout --ours|--theirs -- <path>`.
    pub fn checkout_side(&self, path: &str, side: Side) -> Result<(), GitError> {
        self.run(&["checkout", side.flag(), "--", path])?;
        Ok(())
    }

    /// `git checkout <rev> -- <paths>`: restore paths without moving HEAD.
    #[instrument(skip(self, paths), fields(dir = %self.work_dir.display(), count = paths.len()))]
    pub fn checkout_paths(&self, rev: &str, paths: &[String]) -> Result<(), GitError> {
        let mut args = vec!["checkout", rev, "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run(&args)?;
        info!(rev, "restored paths");
        Ok(())
    }

    /// `git rm -f`: drop tracked paths from the index and the working tree.
    pub fn remove_paths(&self, paths: &[String]) -> Result<(), GitError> {
        let mut args = vec!["rm", "-f", "--quiet", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run(&args)?;
        Ok(())
    }

    pub fn add(&self, paths: &[String]) -> Result<(), GitError> {
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run(&args)?;
        Ok(())
    }

    /// Commit the index and return the new HEAD id.
    #[instrument(skip(self, message), fields(dir = %self.work_dir.display()))]
    pub fn commit(&self, message: &str) -> Result<String, GitError> {
        self.run(&["commit", "-m", message])?;
        let sha = self.head_sha()?;
        info!(sha = %sha, "created commit");
        Ok(sha)
    }

    #[instrument(skip(self), fields(dir = %self.work_dir.display()))]
    pub fn reset_hard(&self, rev: &str) -> Result<(), GitError> {
        self.run(&["reset", "--hard", rev])?;
        info!(rev, "reset --hard");
        Ok(())
    }

    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>, GitError> {
        let out = self.run(&["status", "--porcelain"])?;
        Ok(parse_status_porcelain(&out))
    }

    // -----------------------------------------------------------------------
    // Repository layout
    // -----------------------------------------------------------------------

    /// Absolute top-level directory of this working tree.
    pub fn toplevel(&self) -> Result<PathBuf, GitError> {
        let out = self.run(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Resolve a path inside the git directory, e.g. `info/exclude`.
    ///
    /// Linked worktrees resolve shared files to the common directory.
    pub fn git_path(&self, name: &str) -> Result<PathBuf, GitError> {
        let out = self.run(&["rev-parse", "--git-path", name])?;
        let path = PathBuf::from(out.trim());
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(self.work_dir.join(path))
        }
    }

    /// Keep a tool-managed directory out of `status`.
    ///
    /// When `dir` lies inside this working tree it is listed in
    /// `info/exclude`; directories elsewhere are left alone. Returns whether
    /// a new line was written.
    pub fn exclude_dir(&self, dir: &Path) -> Result<bool, GitError> {
        let top = normalize_path(&self.toplevel()?);
        let dir = normalize_path(&absolute_path(dir));
        let rel = match dir.strip_prefix(&top) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => return Ok(false),
        };
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        let pattern = format!("/{}/", parts.join("/"));

        let exclude = self.git_path("info/exclude")?;
        let existing = match std::fs::read_to_string(&exclude) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        if existing.lines().any(|l| l.trim() == pattern) {
            return Ok(false);
        }

        if let Some(parent) = exclude.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&exclude)?;
        if !existing.is_empty() && !existing.ends_with('\n') {
            writeln!(file)?;
        }
        writeln!(file, "{}", pattern)?;
        info!(pattern = %pattern, "excluded managed directory");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Process plumbing
    // -----------------------------------------------------------------------

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.work_dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_MERGE_AUTOEDIT", "no")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn output(&self, args: &[&str]) -> Result<Output, GitError> {
        debug!(cmd = ?format!("git {}", args.join(" ")), dir = %self.work_dir.display(), "running git command");
        self.command(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GitError::BinaryNotFound("git".into())
            } else {
                GitError::IoError(e)
            }
        })
    }

    fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.output(args)?;
        if !output.status.success() {
            // Some refusals (e.g. "nothing to commit") only go to stdout.
            let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.is_empty() {
                stderr = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(exit_code, %stderr, args = %args.join(" "), "git command failed");
            return Err(GitError::CommandFailed {
                args: args.join(" "),
                exit_code,
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_allow_failure(&self, args: &[&str]) -> Result<CommandOutcome, GitError> {
        let output = self.output(args)?;
        Ok(CommandOutcome {
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Canonicalize the longest existing ancestor and re-append the rest, so
/// paths that do not exist yet still compare against canonical ones.
fn normalize_path(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn merge_args(branch: &str, flags: &MergeFlags) -> Vec<String> {
    let mut args = vec!["merge".to_string()];
    if flags.squash {
        args.push("--squash".into());
    } else {
        if flags.no_commit {
            args.push("--no-commit".into());
        }
        if flags.no_ff {
            args.push("--no-ff".into());
        }
    }
    if let Some(message) = &flags.message {
        args.push("-m".into());
        args.push(message.clone());
    }
    args.push(branch.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_args_plain() {
        let flags = MergeFlags {
            no_ff: true,
            message: Some("Merge story s1".into()),
            ..Default::default()
        };
        assert_eq!(
            merge_args("story/s1", &flags),
            vec!["merge", "--no-ff", "-m", "Merge story s1", "story/s1"]
        );
    }

    #[test]
    fn test_merge_args_probe() {
        let flags = MergeFlags {
            no_commit: true,
            no_ff: true,
            ..Default::default()
        };
        assert_eq!(
            merge_args("story/s1", &flags),
            vec!["merge", "--no-commit", "--no-ff", "story/s1"]
        );
    }

    #[test]
    fn test_merge_args_squash_ignores_commit_flags() {
        let flags = MergeFlags {
            no_commit: true,
            no_ff: true,
            squash: true,
            message: None,
        };
        assert_eq!(merge_args("story/s1", &flags), vec!["merge", "--squash", "story/s1"]);
    }

    #[test]
    fn test_side_flags() {
        assert_eq!(Side::Ours.flag(), "--ours");
        assert_eq!(Side::Theirs.flag(), "--theirs");
    }

    #[test]
    fn test_normalize_path_keeps_missing_tail() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(
            normalize_path(&dir.path().join("state/merges")),
            canonical.join("state").join("merges")
        );
        assert_eq!(normalize_path(dir.path()), canonical);
    }

    #[test]
    fn test_client_construction() {
        let client = GitCli::new("/tmp/repo");
        assert_eq!(client.work_dir(), Path::new("/tmp/repo"));
        assert_eq!(client.at("/tmp/other").work_dir(), Path::new("/tmp/other"));
    }
}
