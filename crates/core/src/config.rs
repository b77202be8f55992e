//! TOML-based configuration for gitstory.
//!
//! Every field has a serde default, so an empty file is a valid
//! configuration. Relative directories are resolved against `repo.path`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::errors::ConfigError;

/// Environment variable that overrides `logging.level`.
pub const LOG_ENV_VAR: &str = "GITSTORY_LOG";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Shared repository settings.
    #[serde(default)]
    pub repo: RepoConfig,

    /// Workspace registry settings.
    #[serde(default)]
    pub worktree: WorktreeConfig,

    /// Merge coordinator settings.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Checkpoint store settings.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Tracing settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Location of the shared repository checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Path to the shared checkout (default `.`).
    #[serde(default = "default_repo_path")]
    pub path: PathBuf,
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            path: default_repo_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Worktrees
// ---------------------------------------------------------------------------

/// Workspace registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeConfig {
    /// Directory holding one checkout per unit (default `.worktrees`).
    #[serde(default = "default_worktree_dir")]
    pub base_dir: PathBuf,

    /// Prefix of every managed branch (default `story/`).
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    /// Maximum number of active workspaces (default 5).
    #[serde(default = "default_max_worktrees")]
    pub max_worktrees: usize,

    /// Age after which a workspace is stale (default one day).
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

fn default_worktree_dir() -> PathBuf {
    PathBuf::from(".worktrees")
}
fn default_branch_prefix() -> String {
    "story/".into()
}
fn default_max_worktrees() -> usize {
    5
}
fn default_stale_after() -> u64 {
    24 * 60 * 60
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            base_dir: default_worktree_dir(),
            branch_prefix: default_branch_prefix(),
            max_worktrees: default_max_worktrees(),
            stale_after_secs: default_stale_after(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Directory for per-attempt audit files (default `.gitstory/merges`).
    #[serde(default = "default_audit_dir")]
    pub audit_dir: PathBuf,

    /// Commit message used when the caller gives none.
    /// `{unit}` and `{branch}` are substituted.
    #[serde(default = "default_message_template")]
    pub message_template: String,
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from(".gitstory/merges")
}
fn default_message_template() -> String {
    "Merge story {unit}".into()
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            audit_dir: default_audit_dir(),
            message_template: default_message_template(),
        }
    }
}

impl MergeConfig {
    pub fn render_message(&self, unit_id: &str, branch: &str) -> String {
        self.message_template
            .replace("{unit}", unit_id)
            .replace("{branch}", branch)
    }
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// Checkpoint store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding one sub-directory of JSON state per unit
    /// (default `.gitstory/stories`).
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".gitstory/stories")
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive: trace, debug, info, warn, error, or a full
    /// `EnvFilter` expression such as `gitstory_core=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Apply environment overrides (currently only [`LOG_ENV_VAR`]).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var(LOG_ENV_VAR) {
            if !level.trim().is_empty() {
                debug!(level = %level, "log level overridden from environment");
                self.logging.level = level;
            }
        }
    }

    /// Validate that all values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = &self.worktree.branch_prefix;
        if prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "worktree.branch_prefix".into(),
                detail: "branch prefix must not be empty".into(),
            });
        }
        if prefix.chars().any(char::is_whitespace) || prefix.starts_with('-') {
            return Err(ConfigError::InvalidValue {
                field: "worktree.branch_prefix".into(),
                detail: format!("'{}' is not usable as a branch name prefix", prefix),
            });
        }
        if self.worktree.max_worktrees == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worktree.max_worktrees".into(),
                detail: "capacity must be > 0".into(),
            });
        }
        if self.merge.message_template.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "merge.message_template".into(),
                detail: "merge message template must not be empty".into(),
            });
        }
        if let Err(e) = EnvFilter::try_new(&self.logging.level) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".into(),
                detail: e.to_string(),
            });
        }
        Ok(())
    }

    /// Convenience: load, apply overrides, and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Resolve a configured directory against the repository path.
    pub fn resolve_dir(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.repo.path.join(dir)
        }
    }

    pub fn worktree_dir(&self) -> PathBuf {
        self.resolve_dir(&self.worktree.base_dir)
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.resolve_dir(&self.merge.audit_dir)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.resolve_dir(&self.checkpoint.state_dir)
    }

    /// Generate a default TOML config template string.
    pub fn default_template() -> &'static str {
        r#"# gitstory configuration

[repo]
path = "."

[worktree]
# Managed directories inside the checkout are added to .git/info/exclude.
base_dir = ".worktrees"
branch_prefix = "story/"
max_worktrees = 5
stale_after_secs = 86400

[merge]
audit_dir = ".gitstory/merges"
message_template = "Merge story {unit}"

[checkpoint]
state_dir = ".gitstory/stories"

[logging]
level = "info"
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_file() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.repo.path, PathBuf::from("."));
        assert_eq!(config.worktree.branch_prefix, "story/");
        assert_eq!(config.worktree.max_worktrees, 5);
        assert_eq!(config.worktree.stale_after_secs, 86_400);
        assert_eq!(config.merge.message_template, "Merge story {unit}");
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_template_parses() {
        let config: AppConfig = toml::from_str(AppConfig::default_template()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.checkpoint.state_dir, PathBuf::from(".gitstory/stories"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gitstory.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"[worktree]\nmax_worktrees = 2\nbranch_prefix = \"agent/\"\n")
            .unwrap();

        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.worktree.max_worktrees, 2);
        assert_eq!(config.worktree.branch_prefix, "agent/");
        assert_eq!(config.worktree.base_dir, PathBuf::from(".worktrees"));
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/gitstory.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[worktree\nmax = ").unwrap();
        assert!(matches!(
            AppConfig::load_from_file(&path),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = AppConfig::default();
        config.worktree.max_worktrees = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "worktree.max_worktrees"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_prefix() {
        let mut config = AppConfig::default();
        config.worktree.branch_prefix = "my story/".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "worktree.branch_prefix"
        ));

        config.worktree.branch_prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_dirs() {
        let mut config = AppConfig::default();
        config.repo.path = PathBuf::from("/srv/repo");
        config.merge.audit_dir = PathBuf::from("/var/audit");
        assert_eq!(config.worktree_dir(), PathBuf::from("/srv/repo/.worktrees"));
        assert_eq!(config.audit_dir(), PathBuf::from("/var/audit"));
        assert_eq!(
            config.state_dir(),
            PathBuf::from("/srv/repo/.gitstory/stories")
        );
    }

    #[test]
    fn test_render_message() {
        let merge = MergeConfig {
            message_template: "Merge {branch} ({unit})".into(),
            ..Default::default()
        };
        assert_eq!(
            merge.render_message("s1", "story/s1"),
            "Merge story/s1 (s1)"
        );
    }
}
