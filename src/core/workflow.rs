//! Fixed-sequence summary pipeline: load, prepare, generate, compare, export.
//!
//! Each stage works on a typed `RunContext`. A failing stage records a
//! `StageFailure`; load, prepare and generate failures halt the run, while
//! compare and export failures are recorded and the run carries on.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::comparison::{ComparisonEngine, ComparisonReport};
use super::llm::{with_timeout, GenerationRequest, TextGenerator};
use super::persona::PersonaManager;
use super::source::{storage_to_text, ContentSource, DocumentMetadata, SourceDocument};
use super::store::{summary_hash, ExportDocument, SummaryStore, HASH_KEY, RUN_KEY};
use crate::error::{DigestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Load,
    Prepare,
    Generate,
    Compare,
    Export,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Load,
        Stage::Prepare,
        Stage::Generate,
        Stage::Compare,
        Stage::Export,
    ];

    /// Whether a failure in this stage stops the run
    pub fn halts_on_failure(self) -> bool {
        matches!(self, Stage::Load | Stage::Prepare | Stage::Generate)
    }

    fn activity(self) -> &'static str {
        match self {
            Stage::Load => "loading content",
            Stage::Prepare => "preparing documents",
            Stage::Generate => "generating summary",
            Stage::Compare => "comparing summaries",
            Stage::Export => "exporting summary",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Prepare => "prepare",
            Stage::Generate => "generate",
            Stage::Compare => "compare",
            Stage::Export => "export",
        };
        f.write_str(name)
    }
}

/// Parameters for one summarization run
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub scope_key: String,
    pub page_id: Option<String>,
    pub include_children: bool,
    pub persona: String,
    pub context: Option<String>,
    pub export: bool,

    /// Ask for per-section change descriptions when comparing
    pub annotate: bool,
}

#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: DigestError,
}

/// State threaded through the stages of one run
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Local>,
    pub request: SummaryRequest,
    pub store: SummaryStore,
    pub documents: Vec<SourceDocument>,
    pub metadata: Option<DocumentMetadata>,
    pub prepared_input: Option<String>,
    pub summary: Option<String>,
    /// Export the current summary was compared against
    pub previous_path: Option<PathBuf>,
    pub comparison: Option<ComparisonReport>,
    pub diff_text: Option<String>,
    pub export_path: Option<PathBuf>,
    pub messages: Vec<String>,
    pub errors: Vec<StageFailure>,
    pub halted_at: Option<Stage>,
}

impl RunContext {
    pub fn new(request: SummaryRequest, store: SummaryStore) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Local::now(),
            request,
            store,
            documents: Vec::new(),
            metadata: None,
            prepared_input: None,
            summary: None,
            previous_path: None,
            comparison: None,
            diff_text: None,
            export_path: None,
            messages: Vec::new(),
            errors: Vec::new(),
            halted_at: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.halted_at.is_none() && self.summary.is_some()
    }

    fn document_id(&self) -> Option<&str> {
        self.request.page_id.as_deref()
    }

    fn scope_key(&self) -> &str {
        &self.request.scope_key
    }
}

pub struct SummaryWorkflow {
    source: Arc<dyn ContentSource>,
    generator: Option<Arc<dyn TextGenerator>>,
    personas: PersonaManager,
    comparison: ComparisonEngine,
    timeout_secs: u64,
    diff_context: usize,
}

impl SummaryWorkflow {
    pub fn new(
        source: Arc<dyn ContentSource>,
        generator: Option<Arc<dyn TextGenerator>>,
        personas: PersonaManager,
        comparison: ComparisonEngine,
        timeout_secs: u64,
        diff_context: usize,
    ) -> Self {
        Self {
            source,
            generator,
            personas,
            comparison,
            timeout_secs,
            diff_context,
        }
    }

    /// Drive one run through every stage, stopping early on a halting
    /// failure or when `cancel` fires between stages.
    pub async fn run(&self, request: SummaryRequest, store: SummaryStore, cancel: &CancellationToken) -> RunContext {
        let mut ctx = RunContext::new(request, store);
        info!("Starting run {} for scope '{}'", ctx.run_id, ctx.scope_key());

        for stage in Stage::ALL {
            if cancel.is_cancelled() {
                warn!("Run {} cancelled before {} stage", ctx.run_id, stage);
                ctx.errors.push(StageFailure {
                    stage,
                    error: DigestError::Cancelled(stage.to_string()),
                });
                ctx.halted_at = Some(stage);
                break;
            }

            debug!("Entering {} stage", stage);
            let outcome = match stage {
                Stage::Load => self.load(&mut ctx).await,
                Stage::Prepare => self.prepare(&mut ctx),
                Stage::Generate => self.generate(&mut ctx).await,
                Stage::Compare => self.compare(&mut ctx).await,
                Stage::Export => self.export(&mut ctx),
            };

            if let Err(error) = outcome {
                warn!("Error {}: {}", stage.activity(), error);
                ctx.messages.push(format!("Error {}: {}", stage.activity(), error));
                ctx.errors.push(StageFailure { stage, error });
                if stage.halts_on_failure() {
                    ctx.halted_at = Some(stage);
                    break;
                }
            }
        }

        ctx
    }

    async fn load(&self, ctx: &mut RunContext) -> Result<()> {
        let documents = self
            .source
            .fetch(
                ctx.scope_key(),
                ctx.request.page_id.as_deref(),
                ctx.request.include_children,
            )
            .await?;

        if documents.is_empty() {
            return Err(DigestError::NoDocuments(ctx.scope_key().to_string()));
        }

        info!("Loaded {} document(s)", documents.len());
        ctx.metadata = documents.first().map(|doc| doc.metadata.clone());
        ctx.documents = documents;
        Ok(())
    }

    fn prepare(&self, ctx: &mut RunContext) -> Result<()> {
        let mut parts = Vec::with_capacity(ctx.documents.len());
        for doc in &ctx.documents {
            let text = storage_to_text(&doc.content);
            parts.push(format!("## {}\n{}", doc.metadata.title, text));
        }

        ctx.prepared_input = Some(parts.join("\n\n"));
        ctx.messages
            .push("Documents loaded successfully. Preparing for summarization...".to_string());
        Ok(())
    }

    async fn generate(&self, ctx: &mut RunContext) -> Result<()> {
        let generator = self
            .generator
            .as_ref()
            .ok_or_else(|| DigestError::Generation("text generation is not configured".to_string()))?;
        let input = ctx
            .prepared_input
            .clone()
            .ok_or_else(|| DigestError::Generation("no prepared input".to_string()))?;

        let request = GenerationRequest {
            persona: ctx.request.persona.clone(),
            persona_prompt: self.personas.get(&ctx.request.persona)?.to_string(),
            context: ctx.request.context.clone(),
            input,
        };

        info!(
            "Generating '{}' summary with {} ({})",
            request.persona,
            generator.provider_name(),
            generator.model_name()
        );
        let summary = with_timeout("summary generation", self.timeout_secs, generator.generate(&request)).await?;

        ctx.summary = Some(summary);
        ctx.messages.push("Summary generated successfully.".to_string());
        Ok(())
    }

    async fn compare(&self, ctx: &mut RunContext) -> Result<()> {
        let Some(summary) = ctx.summary.clone() else {
            debug!("No summary in context, skipping comparison");
            return Ok(());
        };

        let previous = ctx.store.find_previous(
            ctx.scope_key(),
            ctx.document_id(),
            ctx.export_path.as_deref(),
            &ctx.run_id,
        );

        let (entry, parsed) = match previous {
            Ok(Some(found)) => found,
            Ok(None) => {
                debug!("No previous export for scope '{}'", ctx.scope_key());
                return Ok(());
            }
            Err(DigestError::MalformedExport(reason)) => {
                warn!("Previous summary is not usable, skipping comparison: {}", reason);
                ctx.messages
                    .push(format!("Previous summary is not usable: {}", reason));
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if parsed.get(HASH_KEY) == Some(summary_hash(&summary).as_str()) {
            info!("Summary unchanged since {}", entry.path.display());
        }

        let report = self
            .comparison
            .compare(&parsed.summary, &summary, ctx.request.annotate)
            .await;

        let previous_label = entry
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "previous".to_string());
        let diff = report.full_diff_text(self.diff_context, &previous_label, "current");

        if diff.is_empty() {
            ctx.messages.push("No differences from previous summary.".to_string());
        } else {
            ctx.messages.push("Differences from previous summary found.".to_string());
            ctx.diff_text = Some(diff);
        }

        ctx.previous_path = Some(entry.path);
        ctx.comparison = Some(report);
        Ok(())
    }

    fn export(&self, ctx: &mut RunContext) -> Result<()> {
        if !ctx.request.export {
            return Ok(());
        }
        let Some(summary) = ctx.summary.clone() else {
            debug!("No summary in context, nothing to export");
            return Ok(());
        };

        let title = ctx
            .metadata
            .as_ref()
            .map(|m| m.title.clone())
            .unwrap_or_else(|| "Confluence Content".to_string());

        let mut metadata = vec![
            ("Scope".to_string(), ctx.scope_key().to_string()),
            (
                "Document".to_string(),
                ctx.document_id().unwrap_or("space").to_string(),
            ),
            ("Persona".to_string(), ctx.request.persona.clone()),
        ];
        if let Some(meta) = &ctx.metadata {
            if let Some(revision) = meta.revision {
                metadata.push(("Revision".to_string(), revision.to_string()));
            }
            if let Some(author) = &meta.author {
                metadata.push(("Author".to_string(), author.clone()));
            }
            metadata.push(("Source".to_string(), meta.url.clone()));
        }
        metadata.push(("Documents".to_string(), ctx.documents.len().to_string()));
        metadata.push((RUN_KEY.to_string(), ctx.run_id.clone()));
        metadata.push((HASH_KEY.to_string(), summary_hash(&summary)));
        metadata.push((
            "Date".to_string(),
            ctx.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ));

        let document = ExportDocument {
            title,
            metadata,
            summary,
            comparison: ctx.comparison.clone(),
            diff: ctx.diff_text.clone(),
            generated_at: Local::now(),
        };
        let content = document.render()?;

        let path = ctx
            .store
            .export_path(ctx.scope_key(), ctx.document_id(), ctx.started_at);
        ctx.store.write(&path, &content)?;

        info!("Summary exported to: {}", path.display());
        ctx.messages
            .push(format!("Summary exported to: {}", path.display()));
        ctx.export_path = Some(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comparison::{ChangeAnnotator, ANNOTATION_ERROR_MARKER};
    use crate::core::store::parse_export;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubSource {
        documents: Vec<SourceDocument>,
        fail: bool,
    }

    #[async_trait]
    impl ContentSource for StubSource {
        async fn fetch(&self, _scope: &str, _page: Option<&str>, _children: bool) -> Result<Vec<SourceDocument>> {
            if self.fail {
                return Err(DigestError::Fetch("connection refused".to_string()));
            }
            Ok(self.documents.clone())
        }
    }

    /// Returns queued replies in order, failing once the queue is empty
    struct ScriptedGenerator {
        replies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(DigestError::Generation("no reply queued".to_string()));
            }
            Ok(replies.remove(0))
        }

        fn provider_name(&self) -> &str {
            "scripted"
        }

        fn model_name(&self) -> &str {
            "test"
        }
    }

    struct BrokenAnnotator;

    #[async_trait]
    impl ChangeAnnotator for BrokenAnnotator {
        async fn annotate(&self, _old: &str, _new: &str) -> Result<String> {
            Err(DigestError::Timeout {
                operation: "change analysis".to_string(),
                seconds: 1,
            })
        }
    }

    fn page(title: &str, body: &str) -> SourceDocument {
        SourceDocument {
            content: body.to_string(),
            metadata: DocumentMetadata {
                id: "100".to_string(),
                title: title.to_string(),
                scope_key: "ENG".to_string(),
                revision: Some(3),
                created_at: None,
                modified_at: None,
                author: Some("Ada".to_string()),
                url: "https://wiki.example.com/wiki/spaces/ENG/pages/100".to_string(),
            },
        }
    }

    fn request() -> SummaryRequest {
        SummaryRequest {
            scope_key: "ENG".to_string(),
            page_id: None,
            include_children: false,
            persona: "technical".to_string(),
            context: None,
            export: true,
            annotate: true,
        }
    }

    fn workflow(documents: Vec<SourceDocument>, replies: &[&str], annotator: Option<Arc<dyn ChangeAnnotator>>) -> SummaryWorkflow {
        SummaryWorkflow::new(
            Arc::new(StubSource {
                documents,
                fail: false,
            }),
            Some(Arc::new(ScriptedGenerator {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            })),
            PersonaManager::new(),
            ComparisonEngine::new(annotator),
            30,
            3,
        )
    }

    #[tokio::test]
    async fn test_first_run_exports_without_comparison() {
        let dir = tempfile::tempdir().unwrap();
        let flow = workflow(vec![page("Handbook", "<p>Hello</p>")], &["## Intro\nHello"], None);

        let ctx = flow
            .run(request(), SummaryStore::new(dir.path()), &CancellationToken::new())
            .await;

        assert!(ctx.succeeded());
        assert!(ctx.errors.is_empty());
        assert!(ctx.comparison.is_none());
        assert_eq!(ctx.prepared_input.as_deref(), Some("## Handbook\nHello"));

        let path = ctx.export_path.clone().unwrap();
        let parsed = parse_export(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.title, "Handbook");
        assert_eq!(parsed.summary, "## Intro\nHello");
        assert_eq!(parsed.get(RUN_KEY), Some(ctx.run_id.as_str()));
        assert_eq!(parsed.get("Author"), Some("Ada"));
    }

    #[tokio::test]
    async fn test_second_run_compares_against_previous_export() {
        let dir = tempfile::tempdir().unwrap();
        let store = SummaryStore::new(dir.path());
        let docs = vec![page("Handbook", "<p>Hello</p>")];

        let first = workflow(docs.clone(), &["## Intro\nHello\n## Setup\nInstall"], None)
            .run(request(), store.clone(), &CancellationToken::new())
            .await;
        assert!(first.succeeded());

        let ctx = workflow(
            docs,
            &["## Intro\nHello there\n## Setup\nInstall\n## FAQ\nAsk"],
            Some(Arc::new(FixedAnnotator)),
        )
        .run(request(), store.clone(), &CancellationToken::new())
        .await;

        assert!(ctx.succeeded(), "errors: {:?}", ctx.errors);
        let report = ctx.comparison.as_ref().unwrap();
        assert_eq!(report.added_section_titles.len(), 1);
        assert_eq!(report.changed_sections.len(), 1);
        assert_eq!(report.changed_sections[0].title, "Intro");
        assert_eq!(report.changed_sections[0].change_summary.as_deref(), Some("Intro reworded."));
        assert_eq!(ctx.previous_path, first.export_path.clone());
        assert!(ctx.diff_text.as_deref().unwrap().contains("+## FAQ"));

        let written = std::fs::read_to_string(ctx.export_path.as_ref().unwrap()).unwrap();
        assert!(written.contains("## Comparison Statistics"));
        assert!(written.contains("| Intro | 1 | +0 | Intro reworded. |"));
        assert_eq!(store.list_exports("ENG", None).unwrap().len(), 2);
    }

    struct FixedAnnotator;

    #[async_trait]
    impl ChangeAnnotator for FixedAnnotator {
        async fn annotate(&self, _old: &str, _new: &str) -> Result<String> {
            Ok("Intro reworded.".to_string())
        }
    }

    #[tokio::test]
    async fn test_identical_rerun_has_empty_diff() {
        let dir = tempfile::tempdir().unwrap();
        let store = SummaryStore::new(dir.path());
        let docs = vec![page("Handbook", "x")];
        let summary = "## Intro\nHello\n## Setup\nInstall";

        workflow(docs.clone(), &[summary], None)
            .run(request(), store.clone(), &CancellationToken::new())
            .await;
        let ctx = workflow(docs, &[summary], None)
            .run(request(), store, &CancellationToken::new())
            .await;

        let report = ctx.comparison.unwrap();
        assert!(report.changed_sections.is_empty());
        assert!(report.full_diff.iter().all(|op| op.is_context()));
        assert!(ctx.diff_text.is_none());
    }

    #[tokio::test]
    async fn test_annotation_failure_does_not_fail_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = SummaryStore::new(dir.path());
        let docs = vec![page("Handbook", "x")];

        workflow(docs.clone(), &["## A\nx\ny"], None)
            .run(request(), store.clone(), &CancellationToken::new())
            .await;
        let ctx = workflow(docs, &["## A\nx\nz"], Some(Arc::new(BrokenAnnotator)))
            .run(request(), store, &CancellationToken::new())
            .await;

        assert!(ctx.succeeded());
        assert!(ctx.errors.is_empty());
        let section = &ctx.comparison.unwrap().changed_sections[0];
        assert_eq!(section.change_summary.as_deref(), Some(ANNOTATION_ERROR_MARKER));
        assert_eq!(section.diff_line_count, 0);
    }

    #[tokio::test]
    async fn test_load_failure_halts_before_generation() {
        let dir = tempfile::tempdir().unwrap();
        let flow = SummaryWorkflow::new(
            Arc::new(StubSource {
                documents: vec![],
                fail: true,
            }),
            None,
            PersonaManager::new(),
            ComparisonEngine::default(),
            30,
            3,
        );

        let ctx = flow
            .run(request(), SummaryStore::new(dir.path()), &CancellationToken::new())
            .await;
        assert_eq!(ctx.halted_at, Some(Stage::Load));
        assert!(matches!(ctx.errors[0].error, DigestError::Fetch(_)));
        assert!(ctx.messages[0].starts_with("Error loading content"));
        assert!(ctx.summary.is_none());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_zero_documents_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = workflow(vec![], &["unused"], None)
            .run(request(), SummaryStore::new(dir.path()), &CancellationToken::new())
            .await;
        assert_eq!(ctx.halted_at, Some(Stage::Load));
        assert!(matches!(ctx.errors[0].error, DigestError::NoDocuments(_)));
    }

    #[tokio::test]
    async fn test_generation_failure_skips_export() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = workflow(vec![page("Handbook", "x")], &[], None)
            .run(request(), SummaryStore::new(dir.path()), &CancellationToken::new())
            .await;

        assert_eq!(ctx.halted_at, Some(Stage::Generate));
        assert!(ctx.export_path.is_none());
        assert!(!dir.path().exists() || std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_unknown_persona_fails_generation() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request();
        req.persona = "pirate".to_string();
        let ctx = workflow(vec![page("Handbook", "x")], &["summary"], None)
            .run(req, SummaryStore::new(dir.path()), &CancellationToken::new())
            .await;
        assert_eq!(ctx.halted_at, Some(Stage::Generate));
        assert!(matches!(ctx.errors[0].error, DigestError::UnknownPersona(_)));
    }

    #[tokio::test]
    async fn test_malformed_previous_export_skips_comparison() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ENG_space_20200101_000000.md"), "# Broken\nno summary here").unwrap();

        let ctx = workflow(vec![page("Handbook", "x")], &["## Intro\nHi"], None)
            .run(request(), SummaryStore::new(dir.path()), &CancellationToken::new())
            .await;

        assert!(ctx.succeeded());
        assert!(ctx.errors.is_empty());
        assert!(ctx.comparison.is_none());
        assert!(ctx.messages.iter().any(|m| m.starts_with("Previous summary is not usable")));
        assert!(ctx.export_path.is_some());
    }

    #[tokio::test]
    async fn test_non_utf8_previous_export_skips_comparison() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ENG_space_20200101_000000.md"), [0xff, 0xfe, 0x00, 0x80]).unwrap();

        let ctx = workflow(vec![page("Handbook", "x")], &["## Intro\nHi"], None)
            .run(request(), SummaryStore::new(dir.path()), &CancellationToken::new())
            .await;

        assert!(ctx.succeeded());
        assert!(ctx.errors.is_empty());
        assert!(ctx.comparison.is_none());
        assert!(!ctx.messages.iter().any(|m| m.starts_with("Error")));
        assert!(ctx.export_path.is_some());
    }

    #[tokio::test]
    async fn test_no_export_requested() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request();
        req.export = false;
        let ctx = workflow(vec![page("Handbook", "x")], &["## Intro\nHi"], None)
            .run(req, SummaryStore::new(dir.path()), &CancellationToken::new())
            .await;
        assert!(ctx.succeeded());
        assert!(ctx.export_path.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_at_first_stage() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = workflow(vec![page("Handbook", "x")], &["## Intro\nHi"], None)
            .run(request(), SummaryStore::new(dir.path()), &cancel)
            .await;
        assert_eq!(ctx.halted_at, Some(Stage::Load));
        assert!(matches!(ctx.errors[0].error, DigestError::Cancelled(_)));
        assert!(ctx.documents.is_empty());
    }
}
