//! File-based store of exported summaries.
//!
//! Exports are markdown files named `{scope}_{document|space}_{YYYYMMDD_HHMMSS}.md`.
//! A second export within the same second gets a `-N` suffix. The summary
//! body sits between marker comments so it can be read back exactly even
//! when it carries its own `##` headings.

use chrono::{DateTime, Local, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tera::{Context, Tera};
use tracing::debug;
use walkdir::WalkDir;

use super::comparison::ComparisonReport;
use crate::error::{DigestError, Result};

pub const SUMMARY_BEGIN: &str = "<!-- summary:begin -->";
pub const SUMMARY_END: &str = "<!-- summary:end -->";

const SUMMARY_HEADING: &str = "## Summary";
const METADATA_HEADING: &str = "## Metadata";
const STATS_HEADING: &str = "## Comparison Statistics";
const CHANGES_HEADING: &str = "## Changes from Previous Summary";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const DISPLAY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Metadata key holding the id of the run that wrote an export
pub const RUN_KEY: &str = "Run";
/// Metadata key holding the SHA-256 of the summary body
pub const HASH_KEY: &str = "Summary-SHA256";

const EXPORT_TEMPLATE: &str = "# {{ title }}

## Metadata
{% for entry in metadata %}- {{ entry.key }}: {{ entry.value }}
{% endfor %}
## Summary
<!-- summary:begin -->
{{ summary }}
<!-- summary:end -->
{% if stats %}
## Comparison Statistics

### Overview
| Metric | Value |
|--------|-------|
| Total Lines | {{ stats.new_line_count }} (Change: {{ stats.line_difference }}) |
| Changed Sections | {{ stats.changed }} |
| Added Sections | {{ stats.added }} |
| Removed Sections | {{ stats.removed }} |
| Unchanged Sections | {{ stats.unchanged }} |

### Section Changes
| Section | Lines | Change | Summary |
|---------|-------|--------|---------|
{% for row in stats.rows %}| {{ row.title }} | {{ row.lines }} | {{ row.change }} | {{ row.summary }} |
{% endfor %}{% endif %}{% if diff %}
## Changes from Previous Summary

```diff
{{ diff }}```
{% endif %}
---
*Generated on: {{ generated_at }}*
";

/// Everything needed to write one export file
#[derive(Debug, Clone)]
pub struct ExportDocument {
    pub title: String,
    pub metadata: Vec<(String, String)>,
    pub summary: String,
    pub comparison: Option<ComparisonReport>,

    /// Unified diff against the previous summary
    pub diff: Option<String>,

    pub generated_at: DateTime<Local>,
}

/// The parts of an export file that are read back
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedExport {
    pub title: String,
    pub metadata: Vec<(String, String)>,
    pub summary: String,
    pub generated_at: Option<String>,
}

impl ParsedExport {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Serialize)]
struct MetadataEntry<'a> {
    key: &'a str,
    value: String,
}

#[derive(Serialize)]
struct StatsView {
    new_line_count: usize,
    line_difference: String,
    changed: usize,
    added: usize,
    removed: usize,
    unchanged: usize,
    rows: Vec<SectionRow>,
}

#[derive(Serialize)]
struct SectionRow {
    title: String,
    lines: usize,
    change: String,
    summary: String,
}

fn table_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ").trim().to_string()
}

pub fn summary_hash(summary: &str) -> String {
    format!("{:x}", Sha256::digest(summary.as_bytes()))
}

impl ExportDocument {
    pub fn render(&self) -> Result<String> {
        let mut tera = Tera::default();
        tera.add_raw_template("export.md", EXPORT_TEMPLATE)?;

        let metadata: Vec<MetadataEntry> = self
            .metadata
            .iter()
            .map(|(key, value)| MetadataEntry {
                key,
                value: single_line(value),
            })
            .collect();

        let stats = self.comparison.as_ref().map(|report| StatsView {
            new_line_count: report.new_line_count,
            line_difference: format!("{:+}", report.line_difference),
            changed: report.changed_sections.len(),
            added: report.added_section_titles.len(),
            removed: report.removed_section_titles.len(),
            unchanged: report.unchanged_section_titles.len(),
            rows: report
                .changed_sections
                .iter()
                .map(|section| SectionRow {
                    title: table_cell(&section.title),
                    lines: section.new_line_count,
                    change: format!("{:+}", section.diff_line_count),
                    summary: table_cell(section.change_summary.as_deref().unwrap_or("")),
                })
                .collect(),
        });

        let mut context = Context::new();
        context.insert("title", &single_line(&self.title));
        context.insert("metadata", &metadata);
        context.insert("summary", &self.summary);
        context.insert("stats", &stats);
        context.insert("diff", &self.diff.as_deref().filter(|d| !d.is_empty()));
        context.insert(
            "generated_at",
            &self.generated_at.format(DISPLAY_TIMESTAMP_FORMAT).to_string(),
        );

        Ok(tera.render("export.md", &context)?)
    }
}

fn title_regex() -> &'static Regex {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    TITLE.get_or_init(|| Regex::new(r"(?m)^# (.+)$").expect("title pattern is valid"))
}

fn generated_regex() -> &'static Regex {
    static GENERATED: OnceLock<Regex> = OnceLock::new();
    GENERATED.get_or_init(|| {
        Regex::new(r"(?m)^\*Generated on: (.+)\*$").expect("footer pattern is valid")
    })
}

/// Read an export file's title, metadata and summary body.
pub fn parse_export(content: &str) -> Result<ParsedExport> {
    let summary = extract_summary(content)?;

    let title = title_regex()
        .captures(content)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    let generated_at = generated_regex()
        .captures_iter(content)
        .last()
        .map(|caps| caps[1].to_string());

    Ok(ParsedExport {
        title,
        metadata: extract_metadata(content),
        summary,
        generated_at,
    })
}

fn extract_metadata(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .skip_while(|line| *line != METADATA_HEADING)
        .skip(1)
        .take_while(|line| !line.trim().is_empty() && !line.starts_with("## "))
        .filter_map(|line| {
            let entry = line.strip_prefix("- ").unwrap_or(line);
            entry
                .split_once(':')
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn extract_summary(content: &str) -> Result<String> {
    let heading = format!("{}\n", SUMMARY_HEADING);
    let start = if content.starts_with(&heading) {
        heading.len()
    } else {
        content
            .find(&format!("\n{}", heading))
            .map(|i| i + 1 + heading.len())
            .ok_or_else(|| DigestError::MalformedExport(format!("missing '{}' section", SUMMARY_HEADING)))?
    };
    let rest = &content[start..];

    let begin = format!("{}\n", SUMMARY_BEGIN);
    if let Some(body) = rest.strip_prefix(&begin) {
        let end = body
            .find(&format!("\n{}", SUMMARY_END))
            .ok_or_else(|| DigestError::MalformedExport("unterminated summary block".to_string()))?;
        return Ok(body[..end].to_string());
    }

    // Files written without markers: the body runs to the next export-level
    // section or the footer rule.
    let lines: Vec<&str> = rest.lines().collect();
    let end = lines
        .iter()
        .enumerate()
        .position(|(i, line)| {
            *line == STATS_HEADING
                || *line == CHANGES_HEADING
                || (*line == "---" && lines.get(i + 1).is_some_and(|next| next.starts_with("*Generated on:")))
        })
        .unwrap_or(lines.len());
    Ok(lines[..end].join("\n").trim().to_string())
}

/// One export file found in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub path: PathBuf,
    pub timestamp: NaiveDateTime,
    pub sequence: u32,
}

/// Directory of previously exported summaries
#[derive(Debug, Clone)]
pub struct SummaryStore {
    dir: PathBuf,
}

fn sanitize_component(component: &str) -> String {
    component
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
        .collect()
}

impl SummaryStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Filename prefix shared by every export of one scope/document pair
    pub fn file_prefix(scope_key: &str, document_id: Option<&str>) -> String {
        format!(
            "{}_{}_",
            sanitize_component(scope_key),
            sanitize_component(document_id.unwrap_or("space"))
        )
    }

    /// First unused export path for the given moment
    pub fn export_path(&self, scope_key: &str, document_id: Option<&str>, at: DateTime<Local>) -> PathBuf {
        let base = format!(
            "{}{}",
            Self::file_prefix(scope_key, document_id),
            at.format(TIMESTAMP_FORMAT)
        );

        let mut path = self.dir.join(format!("{}.md", base));
        let mut sequence = 1;
        while path.exists() {
            path = self.dir.join(format!("{}-{}.md", base, sequence));
            sequence += 1;
        }
        path
    }

    fn parse_entry(prefix: &str, path: &Path) -> Option<ExportEntry> {
        let name = path.file_name()?.to_str()?;
        let stamp = name.strip_prefix(prefix)?.strip_suffix(".md")?;
        let (stamp, sequence) = match stamp.split_once('-') {
            Some((stamp, seq)) => (stamp, seq.parse().ok()?),
            None => (stamp, 0),
        };
        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
        Some(ExportEntry {
            path: path.to_path_buf(),
            timestamp,
            sequence,
        })
    }

    /// Exports for one scope/document pair, oldest first
    pub fn list_exports(&self, scope_key: &str, document_id: Option<&str>) -> Result<Vec<ExportEntry>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let prefix = Self::file_prefix(scope_key, document_id);
        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| DigestError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(parsed) = Self::parse_entry(&prefix, entry.path()) {
                entries.push(parsed);
            }
        }

        entries.sort_by(|a, b| {
            (a.timestamp, a.sequence, &a.path).cmp(&(b.timestamp, b.sequence, &b.path))
        });
        Ok(entries)
    }

    /// Most recent export that was not written by `run_id` and is not `exclude`.
    ///
    /// Fails with `MalformedExport` when that export cannot be parsed.
    pub fn find_previous(
        &self,
        scope_key: &str,
        document_id: Option<&str>,
        exclude: Option<&Path>,
        run_id: &str,
    ) -> Result<Option<(ExportEntry, ParsedExport)>> {
        for entry in self.list_exports(scope_key, document_id)?.into_iter().rev() {
            if exclude == Some(entry.path.as_path()) {
                continue;
            }
            let parsed = self.read(&entry.path)?;
            if parsed.get(RUN_KEY) == Some(run_id) {
                debug!("Skipping {} written by the current run", entry.path.display());
                continue;
            }
            return Ok(Some((entry, parsed)));
        }
        Ok(None)
    }

    pub fn read(&self, path: &Path) -> Result<ParsedExport> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::InvalidData => {
                DigestError::MalformedExport(format!("{}: not valid UTF-8", path.display()))
            }
            _ => DigestError::Io(e),
        })?;
        parse_export(&content)
            .map_err(|e| DigestError::MalformedExport(format!("{}: {}", path.display(), e)))
    }

    /// Write a new export, never overwriting an existing file
    pub fn write(&self, path: &Path, content: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }
}
