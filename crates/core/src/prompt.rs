//! Interactive prompts used by rollback confirmation and interactive conflict
//! resolution.
//!
//! Both prompts sit behind small traits so that library callers without a
//! terminal can answer them programmatically.

use std::collections::VecDeque;
use std::io;

use console::Style;
use dialoguer::{Confirm as ConfirmPrompt, Input, Select};

use crate::conflict::ConflictRegion;
use crate::models::RollbackSummary;

/// Number of lines of each side shown in a region preview.
pub const PREVIEW_LINES: usize = 5;

// ---------------------------------------------------------------------------
// Rollback confirmation
// ---------------------------------------------------------------------------

/// Yes/no gate shown before a rollback mutates the checkout.
pub trait Confirm {
    fn confirm(&mut self, summary: &RollbackSummary) -> io::Result<bool>;
}

/// Prints the summary to stderr and asks on the terminal; defaults to "no".
#[derive(Debug, Default)]
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&mut self, summary: &RollbackSummary) -> io::Result<bool> {
        let heading = Style::new().yellow().bold();
        let dim = Style::new().dim();
        eprintln!("{}", heading.apply_to("Pending rollback"));
        for line in summary.to_string().lines() {
            eprintln!("{}", dim.apply_to(line));
        }
        ConfirmPrompt::new()
            .with_prompt("Proceed with rollback?")
            .default(false)
            .interact()
            .map_err(prompt_io_error)
    }
}

/// Answers every confirmation with the same value.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Confirm for FixedAnswer {
    fn confirm(&mut self, _summary: &RollbackSummary) -> io::Result<bool> {
        Ok(self.0)
    }
}

// ---------------------------------------------------------------------------
// Region choice
// ---------------------------------------------------------------------------

/// Replacement chosen for one conflict region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionChoice {
    Ours,
    Theirs,
    BothOursFirst,
    BothTheirsFirst,
    /// Literal replacement text; split on `\n`.
    Custom(String),
    /// Leave the region conflicted.
    Skip,
}

impl RegionChoice {
    /// Replacement lines for `region`, or `None` for [`RegionChoice::Skip`].
    pub fn apply(&self, region: &ConflictRegion) -> Option<Vec<String>> {
        let ours = region.ours_lines.iter().cloned();
        let theirs = region.theirs_lines.iter().cloned();
        match self {
            Self::Ours => Some(ours.collect()),
            Self::Theirs => Some(theirs.collect()),
            Self::BothOursFirst => Some(ours.chain(theirs).collect()),
            Self::BothTheirsFirst => Some(theirs.chain(ours).collect()),
            Self::Custom(text) => Some(text.split('\n').map(str::to_string).collect()),
            Self::Skip => None,
        }
    }
}

/// Bounded view of one region shown to the person choosing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionPreview {
    pub file: String,
    /// 1-based position of the region within the file.
    pub index: usize,
    pub total: usize,
    pub ours: Vec<String>,
    pub ours_hidden: usize,
    pub theirs: Vec<String>,
    pub theirs_hidden: usize,
    pub theirs_label: String,
}

impl RegionPreview {
    pub fn from_region(region: &ConflictRegion, index: usize, total: usize) -> Self {
        let (ours, ours_hidden) = truncate(&region.ours_lines);
        let (theirs, theirs_hidden) = truncate(&region.theirs_lines);
        Self {
            file: region.file.clone(),
            index,
            total,
            ours,
            ours_hidden,
            theirs,
            theirs_hidden,
            theirs_label: region.theirs_label.clone(),
        }
    }
}

fn truncate(lines: &[String]) -> (Vec<String>, usize) {
    let shown = lines.iter().take(PREVIEW_LINES).cloned().collect();
    (shown, lines.len().saturating_sub(PREVIEW_LINES))
}

/// Picks a replacement for each conflict region in turn.
pub trait RegionChooser {
    fn choose(&mut self, preview: &RegionPreview) -> io::Result<RegionChoice>;
}

const CHOICE_ITEMS: &[&str] = &[
    "Keep ours",
    "Keep theirs",
    "Both (ours then theirs)",
    "Both (theirs then ours)",
    "Custom text",
    "Skip",
];

/// Terminal chooser built on `dialoguer::Select`.
#[derive(Debug, Default)]
pub struct TerminalChooser;

impl RegionChooser for TerminalChooser {
    fn choose(&mut self, preview: &RegionPreview) -> io::Result<RegionChoice> {
        let header = Style::new().cyan().bold();
        let ours_style = Style::new().green();
        let theirs_style = Style::new().red();

        eprintln!(
            "{}",
            header.apply_to(format!(
                "{} - conflict {}/{}",
                preview.file, preview.index, preview.total
            ))
        );
        eprintln!("{}", ours_style.apply_to("ours:"));
        for line in &preview.ours {
            eprintln!("  {}", ours_style.apply_to(line));
        }
        if preview.ours_hidden > 0 {
            eprintln!("  ... {} more line(s)", preview.ours_hidden);
        }
        eprintln!(
            "{}",
            theirs_style.apply_to(format!("theirs ({}):", preview.theirs_label))
        );
        for line in &preview.theirs {
            eprintln!("  {}", theirs_style.apply_to(line));
        }
        if preview.theirs_hidden > 0 {
            eprintln!("  ... {} more line(s)", preview.theirs_hidden);
        }

        let selection = Select::new()
            .with_prompt("Resolution")
            .items(CHOICE_ITEMS)
            .default(0)
            .interact()
            .map_err(prompt_io_error)?;

        Ok(match selection {
            0 => RegionChoice::Ours,
            1 => RegionChoice::Theirs,
            2 => RegionChoice::BothOursFirst,
            3 => RegionChoice::BothTheirsFirst,
            4 => {
                let text: String = Input::new()
                    .with_prompt("Replacement (use \\n for line breaks)")
                    .allow_empty(true)
                    .interact_text()
                    .map_err(prompt_io_error)?;
                RegionChoice::Custom(text.replace("\\n", "\n"))
            }
            _ => RegionChoice::Skip,
        })
    }
}

/// Replays a fixed sequence of choices, then skips.
#[derive(Debug, Default)]
pub struct ScriptedChooser {
    choices: VecDeque<RegionChoice>,
    seen: Vec<RegionPreview>,
}

impl ScriptedChooser {
    pub fn new<I: IntoIterator<Item = RegionChoice>>(choices: I) -> Self {
        Self {
            choices: choices.into_iter().collect(),
            seen: Vec::new(),
        }
    }

    /// Previews presented so far.
    pub fn seen(&self) -> &[RegionPreview] {
        &self.seen
    }
}

impl RegionChooser for ScriptedChooser {
    fn choose(&mut self, preview: &RegionPreview) -> io::Result<RegionChoice> {
        self.seen.push(preview.clone());
        Ok(self.choices.pop_front().unwrap_or(RegionChoice::Skip))
    }
}

fn prompt_io_error(e: dialoguer::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RollbackOperation;

    fn region(ours: usize, theirs: usize) -> ConflictRegion {
        ConflictRegion {
            file: "a.txt".into(),
            start_line: 0,
            separator_line: ours + 1,
            end_line: ours + theirs + 2,
            ours_lines: (0..ours).map(|i| format!("o{}", i)).collect(),
            theirs_lines: (0..theirs).map(|i| format!("t{}", i)).collect(),
            theirs_label: "story/x".into(),
        }
    }

    #[test]
    fn test_preview_counts_hidden_lines() {
        let preview = RegionPreview::from_region(&region(8, 2), 1, 3);
        assert_eq!(preview.ours.len(), PREVIEW_LINES);
        assert_eq!(preview.ours_hidden, 3);
        assert_eq!(preview.theirs, vec!["t0", "t1"]);
        assert_eq!(preview.theirs_hidden, 0);
        assert_eq!(preview.total, 3);
    }

    #[test]
    fn test_choice_apply() {
        let r = region(1, 1);
        assert_eq!(RegionChoice::Ours.apply(&r), Some(vec!["o0".to_string()]));
        assert_eq!(
            RegionChoice::BothTheirsFirst.apply(&r),
            Some(vec!["t0".to_string(), "o0".to_string()])
        );
        assert_eq!(
            RegionChoice::Custom("x\ny".into()).apply(&r),
            Some(vec!["x".to_string(), "y".to_string()])
        );
        assert_eq!(RegionChoice::Skip.apply(&r), None);
    }

    #[test]
    fn test_scripted_chooser_skips_when_exhausted() {
        let mut chooser = ScriptedChooser::new([RegionChoice::Theirs]);
        let preview = RegionPreview::from_region(&region(1, 1), 1, 2);
        assert_eq!(chooser.choose(&preview).unwrap(), RegionChoice::Theirs);
        assert_eq!(chooser.choose(&preview).unwrap(), RegionChoice::Skip);
        assert_eq!(chooser.seen().len(), 2);
    }

    #[test]
    fn test_fixed_answer() {
        let summary = RollbackSummary {
            subunit_id: "s".into(),
            current_ref: "a".into(),
            target_ref: "b".into(),
            files: vec![],
            operation: RollbackOperation::ResetBranch,
            reason: String::new(),
        };
        assert!(!FixedAnswer(false).confirm(&summary).unwrap());
        assert!(FixedAnswer(true).confirm(&summary).unwrap());
    }
}
