use std::collections::BTreeMap;

use crate::error::{DigestError, Result};

pub const DEFAULT_PERSONA: &str = "technical";

/// Named behavioural presets for summary generation
#[derive(Debug, Clone)]
pub struct PersonaManager {
    personas: BTreeMap<String, String>,
}

impl PersonaManager {
    pub fn new() -> Self {
        let builtin = [
            (
                "technical",
                "You are a technical expert focused on implementation details, code, and technical architecture.
Your summaries should:
1. Highlight technical specifications and requirements
2. Preserve code examples and technical details
3. Focus on implementation approaches and patterns
4. Note any technical constraints or limitations
5. Emphasize system architecture and design decisions",
            ),
            (
                "business",
                "You are a business analyst focused on objectives, requirements, and business value.
Your summaries should:
1. Highlight business objectives and goals
2. Focus on requirements and use cases
3. Emphasize business impact and value
4. Note any business constraints or risks
5. Summarize key stakeholders and their needs",
            ),
            (
                "project",
                "You are a project manager focused on timelines, deliverables, and project status.
Your summaries should:
1. Highlight project milestones and deadlines
2. Focus on deliverables and their status
3. Emphasize dependencies and blockers
4. Note any risks or issues
5. Summarize resource allocation and team assignments",
            ),
            (
                "user",
                "You are a user experience expert focused on usability and user needs.
Your summaries should:
1. Highlight user workflows and interactions
2. Focus on user requirements and needs
3. Emphasize usability considerations
4. Note any user feedback or pain points
5. Summarize user personas and scenarios",
            ),
        ];

        Self {
            personas: builtin
                .into_iter()
                .map(|(name, prompt)| (name.to_string(), prompt.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&str> {
        self.personas
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| DigestError::UnknownPersona(name.to_string()))
    }

    pub fn add(&mut self, name: &str, prompt: &str) {
        self.personas.insert(name.to_string(), prompt.to_string());
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.personas
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DigestError::UnknownPersona(name.to_string()))
    }

    /// All personas sorted by name
    pub fn list(&self) -> impl Iterator<Item = (&str, &str)> {
        self.personas.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// First line of a persona prompt, used as its description
    pub fn describe(prompt: &str) -> &str {
        prompt.lines().next().unwrap_or("").trim()
    }
}

impl Default for PersonaManager {
    fn default() -> Self {
        Self::new()
    }
}
