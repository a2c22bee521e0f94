//! Text generation integration
//!
//! A small trait-based seam around chat-completion style LLM providers. The
//! summary workflow and the change annotator only ever see `TextGenerator`.

mod generator;
mod providers;

pub use generator::{with_timeout, GenerationRequest, LlmChangeAnnotator, TextGenerator};
pub use providers::create_generator;
