//! Conflict resolution strategies.
//!
//! The [`ConflictResolver`] applies one [`ResolutionStrategy`] to a single
//! conflicted path in a checkout and stages the file once it is free of
//! conflict markers.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::classify::{classify, ConflictType};
use super::merger::{merge_json_documents, resolve_region};
use super::parser::{materialize_side, parse_file_regions, splice_regions, ConflictRegion};
use crate::errors::ConflictError;
use crate::git::{GitCli, Side};
use crate::prompt::{RegionChooser, RegionPreview, TerminalChooser};

/// How a conflicted path should be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Take the checked-out branch's version.
    Ours,
    /// Take the merged-in branch's version.
    Theirs,
    /// Leave the file alone and report what needs doing.
    Manual,
    /// Resolve by classification.
    Auto,
    /// Ask per region.
    Interactive,
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
            Self::Manual => write!(f, "manual"),
            Self::Auto => write!(f, "auto"),
            Self::Interactive => write!(f, "interactive"),
        }
    }
}

/// Result of resolving one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// No markers remain and the file is staged.
    Resolved {
        file: String,
        strategy: ResolutionStrategy,
        /// Classification of each region, in file order (empty for ours/theirs).
        conflict_types: Vec<ConflictType>,
    },
    /// Nothing was changed; the caller must act.
    ManualRequired { file: String, instruction: String },
    /// Some regions were skipped; the file is written but not staged.
    Partial {
        file: String,
        resolved: usize,
        remaining: usize,
    },
}

impl ResolveOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}

/// Resolves conflicted paths inside one checkout.
pub struct ConflictResolver {
    git: GitCli,
    chooser: Box<dyn RegionChooser>,
}

impl ConflictResolver {
    /// Resolver that asks on the terminal for the interactive strategy.
    pub fn new(git: GitCli) -> Self {
        Self::with_chooser(git, Box::new(TerminalChooser))
    }

    pub fn with_chooser(git: GitCli, chooser: Box<dyn RegionChooser>) -> Self {
        Self { git, chooser }
    }

    pub fn git(&self) -> &GitCli {
        &self.git
    }

    /// Apply `strategy` to the conflicted `file` (relative to the checkout).
    #[instrument(skip(self), fields(dir = %self.git.work_dir().display()))]
    pub fn resolve(
        &mut self,
        strategy: ResolutionStrategy,
        file: &str,
    ) -> Result<ResolveOutcome, ConflictError> {
        match strategy {
            ResolutionStrategy::Ours | ResolutionStrategy::Theirs => {
                let side = if strategy == ResolutionStrategy::Ours {
                    Side::Ours
                } else {
                    Side::Theirs
                };
                self.git.checkout_side(file, side)?;
                self.git.add(&[file.to_string()])?;
                info!(file, %strategy, "took one side");
                Ok(ResolveOutcome::Resolved {
                    file: file.to_string(),
                    strategy,
                    conflict_types: Vec::new(),
                })
            }
            ResolutionStrategy::Manual => Ok(ResolveOutcome::ManualRequired {
                file: file.to_string(),
                instruction: manual_instruction(file),
            }),
            ResolutionStrategy::Auto => self.resolve_auto(file),
            ResolutionStrategy::Interactive => self.resolve_interactive(file),
        }
    }

    fn resolve_auto(&mut self, file: &str) -> Result<ResolveOutcome, ConflictError> {
        let text = self.read(file)?;
        let regions = parse_file_regions(file, &text);
        if regions.is_empty() {
            debug!(file, "no conflict markers to auto-resolve");
            return Ok(ResolveOutcome::ManualRequired {
                file: file.to_string(),
                instruction: format!(
                    "'{}' has no conflict markers; resolve it with the ours or theirs strategy",
                    file
                ),
            });
        }

        let (resolved, conflict_types) = auto_resolve_text(file, &text, &regions)?;
        self.write(file, &resolved)?;
        self.git.add(&[file.to_string()])?;
        info!(file, regions = regions.len(), "auto-resolved conflicts");

        Ok(ResolveOutcome::Resolved {
            file: file.to_string(),
            strategy: ResolutionStrategy::Auto,
            conflict_types,
        })
    }

    fn resolve_interactive(&mut self, file: &str) -> Result<ResolveOutcome, ConflictError> {
        let text = self.read(file)?;
        let regions = parse_file_regions(file, &text);
        if regions.is_empty() {
            return Ok(ResolveOutcome::ManualRequired {
                file: file.to_string(),
                instruction: manual_instruction(file),
            });
        }

        let total = regions.len();
        let mut replacements = Vec::with_capacity(total);
        for (i, region) in regions.iter().enumerate() {
            let preview = RegionPreview::from_region(region, i + 1, total);
            let choice = self
                .chooser
                .choose(&preview)
                .map_err(|e| ConflictError::Prompt(e.to_string()))?;
            debug!(file, region = i + 1, ?choice, "region choice");
            replacements.push((region, choice.apply(region)));
        }
        let resolved_count = replacements.iter().filter(|(_, r)| r.is_some()).count();

        let updated = splice_regions(&text, &replacements);
        if updated != text {
            self.write(file, &updated)?;
        }

        let remaining = parse_file_regions(file, &updated).len();
        if remaining > 0 {
            warn!(file, remaining, "file still has conflict markers; not staged");
            return Ok(ResolveOutcome::Partial {
                file: file.to_string(),
                resolved: resolved_count,
                remaining,
            });
        }

        self.git.add(&[file.to_string()])?;
        info!(file, regions = total, "interactively resolved conflicts");
        Ok(ResolveOutcome::Resolved {
            file: file.to_string(),
            strategy: ResolutionStrategy::Interactive,
            conflict_types: regions.iter().map(|r| classify(file, r)).collect(),
        })
    }

    fn path(&self, file: &str) -> PathBuf {
        self.git.work_dir().join(file)
    }

    fn read(&self, file: &str) -> Result<String, ConflictError> {
        let path = self.path(file);
        std::fs::read_to_string(&path).map_err(|source| ConflictError::Io { path, source })
    }

    fn write(&self, file: &str, contents: &str) -> Result<(), ConflictError> {
        let path = self.path(file);
        std::fs::write(&path, contents).map_err(|source| ConflictError::Io { path, source })
    }
}

fn manual_instruction(file: &str) -> String {
    format!(
        "edit '{}' to remove the conflict markers, then run `git add -- {}`",
        file, file
    )
}

/// Resolve every region of `text` by classification.
///
/// Fails without producing output if any region is not auto-resolvable.
/// Line-level regions are spliced first; any `json` regions left are then
/// merged as whole documents built from each side.
pub(crate) fn auto_resolve_text(
    file: &str,
    text: &str,
    regions: &[ConflictRegion],
) -> Result<(String, Vec<ConflictType>), ConflictError> {
    let types: Vec<ConflictType> = regions.iter().map(|r| classify(file, r)).collect();
    if let Some(bad) = types.iter().find(|t| !t.is_auto_resolvable()) {
        return Err(ConflictError::UnresolvableConflictType {
            file: file.to_string(),
            conflict_type: *bad,
        });
    }

    let replacements: Vec<(&ConflictRegion, Option<Vec<String>>)> = regions
        .iter()
        .zip(&types)
        .map(|(r, t)| (r, resolve_region(*t, r)))
        .collect();
    let spliced = splice_regions(text, &replacements);

    if !types.contains(&ConflictType::Json) {
        return Ok((spliced, types));
    }

    let remaining = parse_file_regions(file, &spliced);
    let ours = materialize_side(&spliced, &remaining, Side::Ours);
    let theirs = materialize_side(&spliced, &remaining, Side::Theirs);
    let merged = merge_json_documents(file, &ours, &theirs)?;
    Ok((merged, types))
}
