use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::core::{
    ComparisonReport, Engine, FileComparison, ParsedExport, PersonaManager, RunContext,
    SummaryRequest, DEFAULT_PERSONA,
};

#[derive(Parser)]
#[command(name = "wikidigest")]
#[command(about = "Persona-driven summaries of wiki spaces that track how they change between runs")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to a KEY=VALUE secrets file
    #[arg(long, default_value = "secrets")]
    pub secrets: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a summary of a space or page
    Summarize {
        /// Key of the space to summarize
        scope_key: String,

        /// Specific page ID to summarize
        #[arg(long)]
        page_id: Option<String>,

        /// Include child pages of --page-id
        #[arg(long)]
        include_children: bool,

        /// Persona to use for summarization
        #[arg(long, default_value = DEFAULT_PERSONA)]
        persona: String,

        /// Additional context for summarization
        #[arg(long)]
        context: Option<String>,

        /// Skip writing the summary to the export directory
        #[arg(long = "no-export")]
        no_export: bool,

        /// Directory to export summaries to
        #[arg(long)]
        export_dir: Option<PathBuf>,

        /// Skip LLM descriptions of changed sections
        #[arg(long)]
        no_annotate: bool,
    },

    /// Compare two summary files
    Compare {
        file1: PathBuf,
        file2: PathBuf,

        /// Ask the LLM to describe each changed section
        #[arg(long)]
        annotate: bool,

        /// Print the comparison report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List available summarization personas
    ListPersonas,
}

impl Cli {
    pub async fn execute(self, engine: Engine) -> Result<()> {
        match self.command {
            Commands::Summarize {
                scope_key,
                page_id,
                include_children,
                persona,
                context,
                no_export,
                export_dir,
                no_annotate,
            } => {
                let request = SummaryRequest {
                    scope_key,
                    page_id,
                    include_children,
                    persona,
                    context,
                    export: !no_export,
                    annotate: !no_annotate,
                };

                let cancel = CancellationToken::new();
                let on_interrupt = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        on_interrupt.cancel();
                    }
                });

                let ctx = engine.summarize(request, export_dir, &cancel).await?;
                print_run(&ctx);
                if !ctx.succeeded() {
                    bail!("summary run did not complete");
                }
                Ok(())
            }
            Commands::Compare {
                file1,
                file2,
                annotate,
                json,
            } => {
                let comparison = engine.compare_files(&file1, &file2, annotate).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&comparison.report)?);
                } else {
                    print_file_comparison(&file1, &file2, &comparison);
                }
                Ok(())
            }
            Commands::ListPersonas => {
                print_personas(engine.personas());
                Ok(())
            }
        }
    }
}

fn print_table(title: &str, headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let line = |cells: Vec<String>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect();
        format!("| {} |", padded.join(" | "))
    };

    println!("\n{}", title);
    println!("{}", line(headers.iter().map(|h| h.to_string()).collect()));
    println!(
        "|{}|",
        widths.iter().map(|w| "-".repeat(w + 2)).collect::<Vec<_>>().join("|")
    );
    for row in rows {
        println!("{}", line(row.clone()));
    }
}

fn print_report(report: &ComparisonReport) {
    let mut rows = Vec::new();
    for section in &report.changed_sections {
        rows.push(vec![
            section.title.clone(),
            section.old_line_count.to_string(),
            section.new_line_count.to_string(),
            format!("{:+}", section.diff_line_count),
            section
                .change_summary
                .clone()
                .unwrap_or_else(|| "Content updated".to_string()),
        ]);
    }
    for title in &report.added_section_titles {
        rows.push(vec![title.clone(), "0".into(), "-".into(), "new".into(), "New section".into()]);
    }
    for title in &report.removed_section_titles {
        rows.push(vec![title.clone(), "-".into(), "0".into(), "gone".into(), "Section removed".into()]);
    }

    println!(
        "\nTotal lines: {} -> {} ({:+})",
        report.old_line_count, report.new_line_count, report.line_difference
    );
    if rows.is_empty() {
        println!("No section changes");
    } else {
        print_table(
            "Section Changes",
            &["Section", "Old Lines", "New Lines", "Change", "Summary"],
            &rows,
        );
    }
}

fn print_run(ctx: &RunContext) {
    if let Some(summary) = &ctx.summary {
        println!("\nSummary Generated:\n\n{}", summary);
    }

    if let Some(path) = &ctx.export_path {
        println!("\nSummary exported to: {}", path.display());
    }

    if let (Some(report), Some(previous)) = (&ctx.comparison, &ctx.previous_path) {
        println!("\nChanges from previous summary ({}):", previous.display());
        print_report(report);
        if let Some(diff) = &ctx.diff_text {
            println!("\n{}", diff);
        }
    }

    for message in &ctx.messages {
        if message.starts_with("Error") {
            eprintln!("error: {}", message);
        } else {
            println!("{}", message);
        }
    }
}

fn metadata_rows(left: &ParsedExport, right: &ParsedExport) -> Vec<Vec<String>> {
    let mut keys: Vec<&str> = left.metadata.iter().map(|(k, _)| k.as_str()).collect();
    for (key, _) in &right.metadata {
        if !keys.contains(&key.as_str()) {
            keys.push(key);
        }
    }

    keys.into_iter()
        .map(|key| {
            vec![
                key.to_string(),
                left.get(key).unwrap_or("N/A").to_string(),
                right.get(key).unwrap_or("N/A").to_string(),
            ]
        })
        .collect()
}

fn print_file_comparison(file1: &Path, file2: &Path, comparison: &FileComparison) {
    if let (Some(left), Some(right)) = (&comparison.left, &comparison.right) {
        let mut rows = vec![vec!["Title".to_string(), left.title.clone(), right.title.clone()]];
        rows.extend(metadata_rows(left, right));
        let (left_label, right_label) = (file1.display().to_string(), file2.display().to_string());
        print_table(
            "Summary Comparison - Metadata",
            &["Property", left_label.as_str(), right_label.as_str()],
            &rows,
        );
    }

    print_report(&comparison.report);

    println!("\nDetailed Changes:");
    if comparison.diff_text.is_empty() {
        println!("No changes found");
    } else {
        print!("{}", comparison.diff_text);
    }
}

fn print_personas(personas: &PersonaManager) {
    let rows: Vec<Vec<String>> = personas
        .list()
        .map(|(name, prompt)| vec![name.to_string(), PersonaManager::describe(prompt).to_string()])
        .collect();
    print_table("Available Personas", &["Name", "Description"], &rows);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export(metadata: &[(&str, &str)]) -> ParsedExport {
        ParsedExport {
            title: "T".to_string(),
            metadata: metadata.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            summary: String::new(),
            generated_at: None,
        }
    }

    #[test]
    fn test_metadata_rows_union_in_order() {
        let left = export(&[("Scope", "ENG"), ("Date", "d1")]);
        let right = export(&[("Date", "d2"), ("Revision", "4")]);
        let rows = metadata_rows(&left, &right);
        assert_eq!(
            rows,
            vec![
                vec!["Scope".to_string(), "ENG".to_string(), "N/A".to_string()],
                vec!["Date".to_string(), "d1".to_string(), "d2".to_string()],
                vec!["Revision".to_string(), "N/A".to_string(), "4".to_string()],
            ]
        );
    }

    #[test]
    fn test_cli_parses_summarize_flags() {
        let cli = Cli::parse_from([
            "wikidigest",
            "summarize",
            "ENG",
            "--page-id",
            "42",
            "--persona",
            "business",
            "--no-export",
        ]);
        match cli.command {
            Commands::Summarize {
                scope_key,
                page_id,
                persona,
                no_export,
                no_annotate,
                ..
            } => {
                assert_eq!(scope_key, "ENG");
                assert_eq!(page_id.as_deref(), Some("42"));
                assert_eq!(persona, "business");
                assert!(no_export);
                assert!(!no_annotate);
            }
            _ => panic!("expected summarize"),
        }
    }

    #[test]
    fn test_cli_parses_compare_and_list() {
        let cli = Cli::parse_from(["wikidigest", "compare", "a.md", "b.md", "--json"]);
        assert!(matches!(cli.command, Commands::Compare { json: true, annotate: false, .. }));

        let cli = Cli::parse_from(["wikidigest", "list-personas"]);
        assert!(matches!(cli.command, Commands::ListPersonas));
    }
}
