// src/core/engine.rs
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    parse_export, ComparisonEngine, ComparisonReport, ConfluenceSource, ContentSource,
    LlmChangeAnnotator, ParsedExport, PersonaManager, RunContext, SummaryRequest, SummaryStore,
    SummaryWorkflow, TextGenerator,
};
use crate::config::Config;

/// Result of comparing two files on disk
#[derive(Debug)]
pub struct FileComparison {
    /// Parsed export headers, when the files are summary exports
    pub left: Option<ParsedExport>,
    pub right: Option<ParsedExport>,
    pub report: ComparisonReport,
    pub diff_text: String,
}

/// Main orchestration engine for wikidigest
pub struct Engine {
    config: Config,
    personas: PersonaManager,
    source: Option<Arc<dyn ContentSource>>,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl Engine {
    /// Create a new engine from an already-loaded configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        debug!("Loaded configuration: {:?}", config.export);

        let source: Option<Arc<dyn ContentSource>> = match ConfluenceSource::new(&config.source) {
            Ok(source) => Some(Arc::new(source)),
            Err(e) => {
                debug!("Content source unavailable: {}", e);
                None
            }
        };

        // Initialize text generation if enabled
        let generator = if config.llm.enabled {
            match super::llm::create_generator(&config.llm) {
                Ok(generator) => {
                    info!("LLM integration enabled: {} ({})", generator.provider_name(), generator.model_name());
                    Some(Arc::from(generator))
                }
                Err(e) => {
                    warn!("Failed to initialize text generator: {}", e);
                    warn!("Summaries and change analysis are unavailable");
                    None
                }
            }
        } else {
            debug!("LLM integration disabled");
            None
        };

        Ok(Self {
            config,
            personas: PersonaManager::new(),
            source,
            generator,
        })
    }

    pub fn personas(&self) -> &PersonaManager {
        &self.personas
    }

    fn comparison_engine(&self) -> ComparisonEngine {
        let annotator = self
            .generator
            .as_ref()
            .filter(|_| self.config.export.annotate_changes)
            .map(|generator| {
                Arc::new(LlmChangeAnnotator::new(generator.clone(), self.config.llm.timeout_secs))
                    as Arc<dyn super::ChangeAnnotator>
            });
        ComparisonEngine::new(annotator)
    }

    /// Run the summary workflow for one scope key
    pub async fn summarize(
        &self,
        request: SummaryRequest,
        export_dir: Option<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<RunContext> {
        let source = self.source.clone().ok_or_else(|| {
            anyhow!("Confluence credentials missing: set CONFLUENCE_API_TOKEN or source.api_token")
        })?;

        let store = SummaryStore::new(export_dir.unwrap_or_else(|| self.config.export.export_dir.clone()));
        let workflow = SummaryWorkflow::new(
            source,
            self.generator.clone(),
            self.personas.clone(),
            self.comparison_engine(),
            self.config.llm.timeout_secs,
            self.config.export.diff_context_lines,
        );

        Ok(workflow.run(request, store, cancel).await)
    }

    /// Compare two files, using their summary bodies when both are exports
    pub async fn compare_files(&self, old_path: &Path, new_path: &Path, annotate: bool) -> Result<FileComparison> {
        let old_content = std::fs::read_to_string(old_path)
            .map_err(|e| anyhow!("Failed to read {}: {}", old_path.display(), e))?;
        let new_content = std::fs::read_to_string(new_path)
            .map_err(|e| anyhow!("Failed to read {}: {}", new_path.display(), e))?;

        let left = parse_export(&old_content).ok();
        let right = parse_export(&new_content).ok();

        let (old_text, new_text) = match (&left, &right) {
            (Some(l), Some(r)) => (l.summary.as_str(), r.summary.as_str()),
            _ => {
                debug!("Comparing full file contents");
                (old_content.as_str(), new_content.as_str())
            }
        };

        if annotate && self.generator.is_none() {
            warn!("Change analysis requested but no text generator is configured");
        }

        let report = self.comparison_engine().compare(old_text, new_text, annotate).await;
        let diff_text = report.full_diff_text(
            self.config.export.diff_context_lines,
            &old_path.display().to_string(),
            &new_path.display().to_string(),
        );

        Ok(FileComparison {
            left,
            right,
            report,
            diff_text,
        })
    }
}
