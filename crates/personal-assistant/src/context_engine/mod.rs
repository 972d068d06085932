//! Chat pipeline: context snapshot, prompt, model call and persistence.

pub mod context_builder;
pub mod prompt;
pub mod response_generator;
pub mod orchestrator;

pub use context_builder::{ContextBuilder, ContextBuilderConfig, ContextBundle, DayTag};
pub use response_generator::{GenerationOutcome, GeneratorConfig, ResponseGenerator, FALLBACK_RESPONSE};
pub use orchestrator::{ChatError, ChatOrchestrator, ChatReply};
