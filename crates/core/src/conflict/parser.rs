//! Conflict marker parsing and splicing.
//!
//! Recognizes the standard `<<<<<<<` / `=======` / `>>>>>>>` delimiters in a
//! single pass. An optional diff3 base section (`|||||||`) is skipped. Blocks
//! that are unterminated or malformed are dropped, never emitted partially.

use serde::{Deserialize, Serialize};

use crate::git::Side;

const MARKER_START: &str = "<<<<<<<";
const MARKER_BASE: &str = "|||||||";
const MARKER_SEPARATOR: &str = "=======";
const MARKER_END: &str = ">>>>>>>";

/// One conflicted region of a file.
///
/// Line numbers are 0-based indices into the file's `\n`-separated lines and
/// point at the marker lines themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRegion {
    pub file: String,
    pub start_line: usize,
    pub separator_line: usize,
    pub end_line: usize,
    pub ours_lines: Vec<String>,
    pub theirs_lines: Vec<String>,
    pub theirs_label: String,
}

impl ConflictRegion {
    pub fn lines(&self, side: Side) -> &[String] {
        match side {
            Side::Ours => &self.ours_lines,
            Side::Theirs => &self.theirs_lines,
        }
    }
}

enum ScanState {
    Outside,
    Ours {
        start: usize,
        ours: Vec<String>,
    },
    Base {
        start: usize,
        ours: Vec<String>,
    },
    Theirs {
        start: usize,
        separator: usize,
        ours: Vec<String>,
        theirs: Vec<String>,
    },
}

/// Parse every well-formed conflict block in `text`.
pub fn parse_conflict_markers(text: &str) -> Vec<ConflictRegion> {
    let mut regions = Vec::new();
    let mut state = ScanState::Outside;

    for (idx, raw) in text.split('\n').enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);

        if is_marker(line, MARKER_START) {
            // A new opener abandons any block still open.
            state = ScanState::Ours {
                start: idx,
                ours: Vec::new(),
            };
            continue;
        }

        state = match state {
            ScanState::Outside => ScanState::Outside,
            ScanState::Ours { start, mut ours } => {
                if is_marker(line, MARKER_BASE) {
                    ScanState::Base { start, ours }
                } else if is_separator(line) {
                    ScanState::Theirs {
                        start,
                        separator: idx,
                        ours,
                        theirs: Vec::new(),
                    }
                } else if is_marker(line, MARKER_END) {
                    ScanState::Outside
                } else {
                    ours.push(raw.to_string());
                    ScanState::Ours { start, ours }
                }
            }
            ScanState::Base { start, ours } => {
                if is_separator(line) {
                    ScanState::Theirs {
                        start,
                        separator: idx,
                        ours,
                        theirs: Vec::new(),
                    }
                } else if is_marker(line, MARKER_END) {
                    ScanState::Outside
                } else {
                    ScanState::Base { start, ours }
                }
            }
            ScanState::Theirs {
                start,
                separator,
                ours,
                mut theirs,
            } => {
                if is_marker(line, MARKER_END) {
                    regions.push(ConflictRegion {
                        file: String::new(),
                        start_line: start,
                        separator_line: separator,
                        end_line: idx,
                        ours_lines: ours,
                        theirs_lines: theirs,
                        theirs_label: marker_label(line, MARKER_END),
                    });
                    ScanState::Outside
                } else if is_separator(line) || is_marker(line, MARKER_BASE) {
                    ScanState::Outside
                } else {
                    theirs.push(raw.to_string());
                    ScanState::Theirs {
                        start,
                        separator,
                        ours,
                        theirs,
                    }
                }
            }
        };
    }

    regions
}

/// Parse `text` and tag every region with `file`.
pub fn parse_file_regions(file: &str, text: &str) -> Vec<ConflictRegion> {
    let mut regions = parse_conflict_markers(text);
    for region in &mut regions {
        region.file = file.to_string();
    }
    regions
}

pub fn has_conflict_markers(text: &str) -> bool {
    !parse_conflict_markers(text).is_empty()
}

/// Replace each region (marker lines included) with its replacement lines.
///
/// Regions paired with `None` are left untouched. Regions must come from
/// parsing `text` itself.
pub fn splice_regions(text: &str, replacements: &[(&ConflictRegion, Option<Vec<String>>)]) -> String {
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();

    let mut ordered: Vec<&(&ConflictRegion, Option<Vec<String>>)> = replacements.iter().collect();
    ordered.sort_by(|a, b| b.0.start_line.cmp(&a.0.start_line));

    for (region, replacement) in ordered {
        let Some(replacement) = replacement else {
            continue;
        };
        if region.end_line >= lines.len() || region.start_line > region.end_line {
            continue;
        }
        lines.splice(region.start_line..=region.end_line, replacement.iter().cloned());
    }

    lines.join("\n")
}

/// The whole file as one side would have written it.
pub fn materialize_side(text: &str, regions: &[ConflictRegion], side: Side) -> String {
    let replacements: Vec<(&ConflictRegion, Option<Vec<String>>)> = regions
        .iter()
        .map(|r| (r, Some(r.lines(side).to_vec())))
        .collect();
    splice_regions(text, &replacements)
}

fn is_marker(line: &str, marker: &str) -> bool {
    match line.strip_prefix(marker) {
        Some(rest) => rest.is_empty() || rest.starts_with(' '),
        None => false,
    }
}

fn is_separator(line: &str) -> bool {
    line.trim_end() == MARKER_SEPARATOR
}

fn marker_label(line: &str, marker: &str) -> String {
    line.strip_prefix(marker).unwrap_or("").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_BLOCK: &str = "fn main() {\n<<<<<<< HEAD\n    println!(\"ours\");\n=======\n    println!(\"theirs\");\n    println!(\"more\");\n>>>>>>> story/s1\n}\n";

    #[test]
    fn test_no_conflicts() {
        assert!(parse_conflict_markers("plain\ntext\n").is_empty());
        assert!(parse_conflict_markers("").is_empty());
        assert!(!has_conflict_markers("a == b\n"));
    }

    #[test]
    fn test_single_block_positions() {
        let regions = parse_conflict_markers(ONE_BLOCK);
        assert_eq!(regions.len(), 1);
        let r = &regions[0];
        assert_eq!(r.start_line, 1);
        assert_eq!(r.separator_line, 3);
        assert_eq!(r.end_line, 6);
        assert_eq!(r.ours_lines, vec!["    println!(\"ours\");"]);
        assert_eq!(r.theirs_lines.len(), 2);
        assert_eq!(r.theirs_label, "story/s1");
    }

    #[test]
    fn test_single_block_reconstructs_content_without_markers() {
        let regions = parse_conflict_markers(ONE_BLOCK);
        let r = &regions[0];
        let lines: Vec<&str> = ONE_BLOCK.split('\n').collect();

        let mut rebuilt: Vec<String> = lines[..r.start_line].iter().map(|s| s.to_string()).collect();
        rebuilt.extend(r.ours_lines.iter().cloned());
        rebuilt.extend(r.theirs_lines.iter().cloned());
        rebuilt.extend(lines[r.end_line + 1..].iter().map(|s| s.to_string()));

        let without_markers: Vec<String> = lines
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != r.start_line && *i != r.separator_line && *i != r.end_line)
            .map(|(_, l)| l.to_string())
            .collect();
        assert_eq!(rebuilt, without_markers);
    }

    #[test]
    fn test_unterminated_block_dropped() {
        let text = "a\n<<<<<<< HEAD\nours\n=======\ntheirs\n";
        assert!(parse_conflict_markers(text).is_empty());
    }

    #[test]
    fn test_missing_separator_dropped() {
        let text = "<<<<<<< HEAD\nours\n>>>>>>> other\nafter\n";
        assert!(parse_conflict_markers(text).is_empty());
    }

    #[test]
    fn test_reopened_block_keeps_only_second() {
        let text = "<<<<<<< HEAD\nstray\n<<<<<<< HEAD\nx\n=======\ny\n>>>>>>> b\n";
        let regions = parse_conflict_markers(text);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].start_line, 2);
        assert_eq!(regions[0].ours_lines, vec!["x"]);
    }

    #[test]
    fn test_diff3_base_section_skipped() {
        let text = "<<<<<<< ours\nnew ours\n||||||| base\nold\n=======\nnew theirs\n>>>>>>> theirs\n";
        let regions = parse_conflict_markers(text);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].ours_lines, vec!["new ours"]);
        assert_eq!(regions[0].theirs_lines, vec!["new theirs"]);
    }

    #[test]
    fn test_crlf_markers() {
        let text = "<<<<<<< HEAD\r\na\r\n=======\r\nb\r\n>>>>>>> x\r\n";
        let regions = parse_conflict_markers(text);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].ours_lines, vec!["a\r"]);
        assert_eq!(regions[0].theirs_label, "x");
    }

    #[test]
    fn test_longer_marker_runs_are_content() {
        let text = "<<<<<<<< not a marker\n========\n";
        assert!(parse_conflict_markers(text).is_empty());
    }

    #[test]
    fn test_splice_and_materialize() {
        let regions = parse_conflict_markers(ONE_BLOCK);
        assert_eq!(
            materialize_side(ONE_BLOCK, &regions, Side::Ours),
            "fn main() {\n    println!(\"ours\");\n}\n"
        );
        let untouched = splice_regions(ONE_BLOCK, &[(&regions[0], None)]);
        assert_eq!(untouched, ONE_BLOCK);
    }

    #[test]
    fn test_parse_file_regions_tags_file() {
        let regions = parse_file_regions("src/main.rs", ONE_BLOCK);
        assert_eq!(regions[0].file, "src/main.rs");
    }
}
