//! Section-aware comparison of two summary versions.
//!
//! Both texts are split into titled sections, aligned by title and diffed
//! line by line per section. A whole-document diff is computed alongside for
//! the raw view. Changed sections may be annotated with a short description
//! from an external service; annotation never fails the comparison.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::differ::{diff_lines, diff_text, has_changes, render_unified, LineOp};
use super::matcher::match_sections;
use super::section::split_sections;
use crate::error::Result;

/// Placed in `change_summary` when the annotator fails or times out.
pub const ANNOTATION_ERROR_MARKER: &str = "[change analysis unavailable]";

/// Describes how a section changed between two versions
#[async_trait]
pub trait ChangeAnnotator: Send + Sync {
    async fn annotate(&self, old_body: &str, new_body: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionDiff {
    pub title: String,
    pub old_line_count: usize,
    pub new_line_count: usize,

    /// `new_line_count - old_line_count`
    pub diff_line_count: i64,

    pub edit_script: Vec<LineOp>,
    pub change_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub old_line_count: usize,
    pub new_line_count: usize,
    pub line_difference: i64,
    pub added_section_titles: BTreeSet<String>,
    pub removed_section_titles: BTreeSet<String>,

    /// Common sections whose bodies are identical
    pub unchanged_section_titles: BTreeSet<String>,

    /// Ordered as the sections appear in the new document
    pub changed_sections: Vec<SectionDiff>,

    pub full_diff: Vec<LineOp>,
}

impl ComparisonReport {
    pub fn has_changes(&self) -> bool {
        !self.added_section_titles.is_empty()
            || !self.removed_section_titles.is_empty()
            || !self.changed_sections.is_empty()
            || has_changes(&self.full_diff)
    }

    pub fn changed_titles(&self) -> BTreeSet<String> {
        self.changed_sections.iter().map(|s| s.title.clone()).collect()
    }

    /// Unified diff of the whole document, empty when nothing changed
    pub fn full_diff_text(&self, context: usize, old_label: &str, new_label: &str) -> String {
        render_unified(&self.full_diff, context, old_label, new_label)
    }
}

/// Composes splitting, matching and line diffing into a report
#[derive(Clone, Default)]
pub struct ComparisonEngine {
    annotator: Option<Arc<dyn ChangeAnnotator>>,
}

impl ComparisonEngine {
    pub fn new(annotator: Option<Arc<dyn ChangeAnnotator>>) -> Self {
        Self { annotator }
    }

    pub fn has_annotator(&self) -> bool {
        self.annotator.is_some()
    }

    /// Compare two document versions.
    ///
    /// When `annotate` is set and an annotator is configured, each changed
    /// section gets a `change_summary`.
    pub async fn compare(&self, old_text: &str, new_text: &str, annotate: bool) -> ComparisonReport {
        let old_sections = split_sections(old_text);
        let new_sections = split_sections(new_text);
        let matched = match_sections(&old_sections, &new_sections);

        let annotator = if annotate { self.annotator.as_deref() } else { None };

        let mut changed_sections = Vec::new();
        let mut unchanged_section_titles = BTreeSet::new();
        let mut seen = BTreeSet::new();

        for section in &new_sections {
            let title = &section.title;
            if !matched.common.contains(title) || !seen.insert(title.clone()) {
                continue;
            }
            let old = matched.old_by_title[title];
            let new = matched.new_by_title[title];

            let edit_script = diff_lines(&old.body_lines, &new.body_lines);
            if !has_changes(&edit_script) {
                unchanged_section_titles.insert(title.clone());
                continue;
            }

            let change_summary = match annotator {
                Some(annotator) => Some(annotate_section(annotator, title, &old.body(), &new.body()).await),
                None => None,
            };

            changed_sections.push(SectionDiff {
                title: title.clone(),
                old_line_count: old.body_lines.len(),
                new_line_count: new.body_lines.len(),
                diff_line_count: signed_difference(old.body_lines.len(), new.body_lines.len()),
                edit_script,
                change_summary,
            });
        }

        let old_line_count = old_text.lines().count();
        let new_line_count = new_text.lines().count();

        debug!(
            "Compared {} -> {} sections: {} added, {} removed, {} changed",
            old_sections.len(),
            new_sections.len(),
            matched.added.len(),
            matched.removed.len(),
            changed_sections.len()
        );

        ComparisonReport {
            old_line_count,
            new_line_count,
            line_difference: signed_difference(old_line_count, new_line_count),
            added_section_titles: matched.added,
            removed_section_titles: matched.removed,
            unchanged_section_titles,
            changed_sections,
            full_diff: diff_text(old_text, new_text),
        }
    }
}

async fn annotate_section(annotator: &dyn ChangeAnnotator, title: &str, old_body: &str, new_body: &str) -> String {
    match annotator.annotate(old_body, new_body).await {
        Ok(summary) => summary,
        Err(e) => {
            warn!("Error analyzing changes in section '{}': {}", title, e);
            ANNOTATION_ERROR_MARKER.to_string()
        }
    }
}

fn signed_difference(old: usize, new: usize) -> i64 {
    new as i64 - old as i64
}
