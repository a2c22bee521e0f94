//! Splits a markdown-like document into titled sections.
//!
//! Every heading line starts a new section regardless of its level, so a
//! `###` subsection closes the `##` section above it. Text before the first
//! heading becomes a preamble section with an empty title. Heading-looking
//! lines inside fenced code blocks are treated as body text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Title given to text that precedes the first heading.
pub const PREAMBLE_TITLE: &str = "";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Heading label with markers and surrounding whitespace removed
    pub title: String,

    /// Number of `#` markers on the heading line (0 for the preamble)
    pub level: usize,

    /// Lines between this heading and the next one
    pub body_lines: Vec<String>,
}

impl Section {
    pub fn is_preamble(&self) -> bool {
        self.level == 0
    }

    /// Rebuild the heading line for this section, if it has one
    pub fn heading_line(&self) -> Option<String> {
        if self.is_preamble() {
            None
        } else {
            Some(format!("{} {}", "#".repeat(self.level), self.title))
        }
    }

    pub fn body(&self) -> String {
        self.body_lines.join("\n")
    }
}

fn heading_regex() -> &'static Regex {
    static HEADING: OnceLock<Regex> = OnceLock::new();
    HEADING.get_or_init(|| {
        Regex::new(r"^(#+)[ \t]+(\S.*?)\s*$").expect("heading pattern is valid")
    })
}

/// Parse a heading line into `(level, title)`
pub fn parse_heading(line: &str) -> Option<(usize, String)> {
    heading_regex()
        .captures(line)
        .map(|caps| (caps[1].len(), caps[2].trim().to_string()))
}

fn fence_marker(line: &str) -> Option<&'static str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

/// Split a document into sections in document order.
///
/// A document with no headings yields one preamble section holding every
/// line. A blank-only preamble before the first heading is dropped.
pub fn split_sections(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current = Section {
        title: PREAMBLE_TITLE.to_string(),
        level: 0,
        body_lines: Vec::new(),
    };
    let mut open_fence: Option<&'static str> = None;

    for line in text.lines() {
        if let Some(marker) = fence_marker(line) {
            open_fence = match open_fence {
                Some(open) if open == marker => None,
                Some(open) => Some(open),
                None => Some(marker),
            };
            current.body_lines.push(line.to_string());
            continue;
        }

        let heading = if open_fence.is_none() { parse_heading(line) } else { None };

        match heading {
            Some((level, title)) => {
                let finished = std::mem::replace(
                    &mut current,
                    Section {
                        title,
                        level,
                        body_lines: Vec::new(),
                    },
                );
                if !finished.is_preamble() || finished.body_lines.iter().any(|l| !l.trim().is_empty()) {
                    sections.push(finished);
                }
            }
            None => current.body_lines.push(line.to_string()),
        }
    }

    if !current.is_preamble() || sections.is_empty() || current.body_lines.iter().any(|l| !l.trim().is_empty()) {
        sections.push(current);
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_basic_sections() {
        let sections = split_sections("## Intro\nHello\n\n## Setup\nrun it\n");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "Intro");
        assert_eq!(sections[0].body_lines, vec!["Hello", ""]);
        assert_eq!(sections[1].title, "Setup");
        assert_eq!(sections[1].level, 2);
        assert_eq!(sections[1].body_lines, vec!["run it"]);
    }

    #[test]
    fn test_no_headings_gives_single_preamble() {
        let sections = split_sections("just text\nmore text");
        assert_eq!(sections.len(), 1);
        assert!(sections[0].is_preamble());
        assert_eq!(sections[0].title, PREAMBLE_TITLE);
        assert_eq!(sections[0].body_lines.len(), 2);

        let empty = split_sections("");
        assert_eq!(empty.len(), 1);
        assert!(empty[0].body_lines.is_empty());
    }

    #[test]
    fn test_preamble_kept_when_non_blank() {
        let sections = split_sections("Overview line\n# Title\nbody");
        assert_eq!(sections.len(), 2);
        assert!(sections[0].is_preamble());
        assert_eq!(sections[1].title, "Title");

        let blank = split_sections("\n\n# Title\nbody");
        assert_eq!(blank.len(), 1);
        assert_eq!(blank[0].title, "Title");
    }

    #[test]
    fn test_all_levels_split_uniformly() {
        let sections = split_sections("## Setup\na\n### Details\nb\n## Next\nc");
        let titles: Vec<_> = sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Setup", "Details", "Next"]);
        assert_eq!(sections[0].body_lines, vec!["a"]);
        assert_eq!(sections[1].level, 3);
    }

    #[test]
    fn test_title_is_stripped() {
        assert_eq!(parse_heading("##   Spaced Title   "), Some((2, "Spaced Title".to_string())));
        assert_eq!(parse_heading("#NoSpace"), None);
        assert_eq!(parse_heading("##    "), None);
        assert_eq!(parse_heading("text # not a heading"), None);
    }

    #[test]
    fn test_headings_inside_fences_are_body() {
        let text = "## Install\n```bash\n# install deps\nmake\n```\n## Use\nok";
        let sections = split_sections(text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].body_lines, vec!["```bash", "# install deps", "make", "```"]);
    }

    #[test]
    fn test_round_trip_with_headings_restored() {
        let text = "## Intro\nHello\n### Detail\n- a\n- b\n## End\nbye";
        let rebuilt: Vec<String> = split_sections(text)
            .iter()
            .flat_map(|s| s.heading_line().into_iter().chain(s.body_lines.iter().cloned()))
            .collect();
        assert_eq!(rebuilt.join("\n"), text);
    }
}
