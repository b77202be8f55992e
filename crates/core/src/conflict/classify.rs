//! Conflict region classification.
//!
//! Precedence: whitespace-only difference, then module-load lines on both
//! sides, then a dotted version token on both sides, then the file extension.

use std::path::Path;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use super::parser::ConflictRegion;

/// Categorisation of a conflict region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Sides differ only in surrounding whitespace.
    Whitespace,
    /// Both sides are module-load / import lines.
    Imports,
    /// Both sides carry a dotted numeric version.
    Version,
    Json,
    Yaml,
    Code,
    Markdown,
    General,
}

impl ConflictType {
    /// Whether the `auto` strategy can resolve this classification.
    pub fn is_auto_resolvable(self) -> bool {
        matches!(
            self,
            Self::Whitespace | Self::Imports | Self::Version | Self::Json
        )
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Whitespace => write!(f, "whitespace"),
            Self::Imports => write!(f, "imports"),
            Self::Version => write!(f, "version"),
            Self::Json => write!(f, "json"),
            Self::Yaml => write!(f, "yaml"),
            Self::Code => write!(f, "code"),
            Self::Markdown => write!(f, "markdown"),
            Self::General => write!(f, "general"),
        }
    }
}

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "js", "mjs", "cjs", "jsx", "ts", "tsx", "py", "go", "java", "kt", "swift", "c", "h",
    "cc", "cpp", "hpp", "cs", "rb", "php", "scala", "sh", "lua", "dart", "ex", "exs",
];

/// Classify one region of `file`.
pub fn classify(file: &str, region: &ConflictRegion) -> ConflictType {
    let ours = region.ours_lines.join("\n");
    let theirs = region.theirs_lines.join("\n");

    if ours.trim() == theirs.trim() {
        return ConflictType::Whitespace;
    }
    if contains_module_load(&region.ours_lines) && contains_module_load(&region.theirs_lines) {
        return ConflictType::Imports;
    }
    if version_token(&ours).is_some() && version_token(&theirs).is_some() {
        return ConflictType::Version;
    }
    classify_by_extension(file)
}

/// Classification that only looks at the file name.
pub fn classify_by_extension(file: &str) -> ConflictType {
    let ext = Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "json" => ConflictType::Json,
        "yaml" | "yml" => ConflictType::Yaml,
        "md" | "markdown" | "mdx" => ConflictType::Markdown,
        e if CODE_EXTENSIONS.contains(&e) => ConflictType::Code,
        _ => ConflictType::General,
    }
}

/// Whether any line looks like a module load in a common language.
pub fn contains_module_load(lines: &[String]) -> bool {
    let re = module_load_re();
    lines.iter().any(|l| re.is_match(l))
}

/// First `major.minor.patch` token in `text`, as numbers.
pub fn version_token(text: &str) -> Option<(u64, u64, u64)> {
    let caps = version_re().captures(text)?;
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
    Some((part(1)?, part(2)?, part(3)?))
}

fn module_load_re() -> &'static Regex {
    static MODULE_LOAD_RE: OnceLock<Regex> = OnceLock::new();
    MODULE_LOAD_RE.get_or_init(|| {
        Regex::new(
            r#"^\s*(import\s|from\s+\S+\s+import\s|export\s.*\sfrom\s|use\s+[\w:{]|extern\s+crate\s|#include\s|@import\s|require\s|(const|let|var)\s+.*=\s*require\(|require\()"#,
        )
        .expect("module load pattern is valid")
    })
}

fn version_re() -> &'static Regex {
    static VERSION_RE: OnceLock<Regex> = OnceLock::new();
    VERSION_RE.get_or_init(|| {
        Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("version pattern is valid")
    })
}
