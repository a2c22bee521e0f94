mod comparison;
mod differ;
mod engine;
mod llm;
mod matcher;
mod persona;
mod section;
mod source;
mod store;
mod workflow;

pub use comparison::{ChangeAnnotator, ComparisonEngine, ComparisonReport};
pub use llm::{LlmChangeAnnotator, TextGenerator};
pub use persona::{PersonaManager, DEFAULT_PERSONA};
pub use source::{ConfluenceSource, ContentSource};
pub use store::{parse_export, ParsedExport, SummaryStore};
pub use workflow::{RunContext, SummaryRequest, SummaryWorkflow};

// Export the main engine
pub use engine::{Engine, FileComparison};
