use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::core::comparison::ChangeAnnotator;
use crate::error::{DigestError, Result};

/// System prompt used to describe what changed in a single section.
pub const CHANGE_ANALYSIS_PROMPT: &str = "Analyze the changes between two versions of a section and provide a brief summary.
Focus on meaningful changes and ignore minor formatting differences.
If the changes are purely formatting or very minor, state that explicitly.
Otherwise, summarize the key changes in 1-2 sentences.";

/// Inputs for one summary generation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Persona label (e.g. "technical")
    pub persona: String,

    /// Behavioural prompt attached to the persona
    pub persona_prompt: String,

    /// Optional extra guidance from the caller
    pub context: Option<String>,

    /// Prepared document text to summarize
    pub input: String,
}

/// Trait for LLM providers that turn prompts into text
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Run a single system + user exchange and return the reply text
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Get the provider name (e.g., "Azure OpenAI")
    fn provider_name(&self) -> &str;

    /// Get the model or deployment being used
    fn model_name(&self) -> &str;

    /// Produce a persona-flavoured summary of the request input
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let system = summary_prompt(request);
        let reply = self.complete(&system, &request.input).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(DigestError::Generation(format!(
                "{} returned an empty summary",
                self.provider_name()
            )));
        }
        Ok(reply.to_string())
    }
}

pub fn summary_prompt(request: &GenerationRequest) -> String {
    let mut prompt = format!(
        "You are a {} tasked with summarizing Confluence documentation.\n\n{}\n\n",
        request.persona, request.persona_prompt
    );

    if let Some(context) = &request.context {
        prompt.push_str(&format!("Additional context: {}\n\n", context));
    }

    prompt.push_str("Please provide a comprehensive summary that:\n");
    prompt.push_str("1. Captures the key points and main ideas\n");
    prompt.push_str("2. Maintains the technical accuracy of the content\n");
    prompt.push_str("3. Is organized in a clear, logical structure using ## section headings\n");
    prompt.push_str("4. Highlights any important warnings, notes, or critical information\n");
    prompt.push_str("5. Preserves any code examples or technical details");
    prompt
}

/// Bound a generator call by `seconds`, mapping expiry to `DigestError::Timeout`
pub async fn with_timeout<T, F>(operation: &str, seconds: u64, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_secs(seconds), fut).await {
        Ok(result) => result,
        Err(_) => Err(DigestError::Timeout {
            operation: operation.to_string(),
            seconds,
        }),
    }
}

/// Change annotator backed by a text generator
pub struct LlmChangeAnnotator {
    generator: Arc<dyn TextGenerator>,
    timeout_secs: u64,
}

impl LlmChangeAnnotator {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout_secs: u64) -> Self {
        Self {
            generator,
            timeout_secs,
        }
    }
}

#[async_trait]
impl ChangeAnnotator for LlmChangeAnnotator {
    async fn annotate(&self, old_body: &str, new_body: &str) -> Result<String> {
        let user = format!("Old version:\n{}\n\nNew version:\n{}", old_body, new_body);
        let reply = with_timeout(
            "change analysis",
            self.timeout_secs,
            self.generator.complete(CHANGE_ANALYSIS_PROMPT, &user),
        )
        .await?;
        Ok(reply.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingGenerator {
        reply: String,
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl TextGenerator for RecordingGenerator {
        async fn complete(&self, system: &str, user: &str) -> Result<String> {
            self.calls.lock().unwrap().push((system.to_string(), user.to_string()));
            Ok(self.reply.clone())
        }

        fn provider_name(&self) -> &str {
            "recording"
        }

        fn model_name(&self) -> &str {
            "test"
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            persona: "business".to_string(),
            persona_prompt: "Focus on value.".to_string(),
            context: Some("Quarterly review".to_string()),
            input: "page body".to_string(),
        }
    }

    #[test]
    fn test_summary_prompt_includes_persona_and_context() {
        let prompt = summary_prompt(&request());
        assert!(prompt.starts_with("You are a business"));
        assert!(prompt.contains("Focus on value."));
        assert!(prompt.contains("Additional context: Quarterly review"));
    }

    #[tokio::test]
    async fn test_generate_trims_reply() {
        let generator = RecordingGenerator {
            reply: "\n## Overview\nText\n\n".to_string(),
            calls: Mutex::new(vec![]),
        };
        let summary = generator.generate(&request()).await.unwrap();
        assert_eq!(summary, "## Overview\nText");
        assert_eq!(generator.calls.lock().unwrap()[0].1, "page body");
    }

    #[tokio::test]
    async fn test_generate_rejects_blank_reply() {
        let generator = RecordingGenerator {
            reply: "   ".to_string(),
            calls: Mutex::new(vec![]),
        };
        assert!(matches!(
            generator.generate(&request()).await,
            Err(DigestError::Generation(_))
        ));
    }

    #[tokio::test]
    async fn test_annotator_sends_both_versions() {
        let generator = Arc::new(RecordingGenerator {
            reply: " Added a new step. ".to_string(),
            calls: Mutex::new(vec![]),
        });
        let annotator = LlmChangeAnnotator::new(generator.clone(), 5);
        let note = annotator.annotate("a", "b").await.unwrap();
        assert_eq!(note, "Added a new step.");

        let calls = generator.calls.lock().unwrap();
        assert_eq!(calls[0].0, CHANGE_ANALYSIS_PROMPT);
        assert_eq!(calls[0].1, "Old version:\na\n\nNew version:\nb");
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout("slow call", 1, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(DigestError::Timeout { seconds: 1, .. })));
    }
}
