// personal-assistant/crates/personal-assistant/src/lib.rs

pub mod api;
pub mod config;
pub mod context_engine;
pub mod db;
pub mod llm;
pub mod metrics;
pub mod server;
pub mod shared_state;
pub mod telemetry;
pub mod utils;

// Public API exports
pub use config::Config;
pub use context_engine::{ChatOrchestrator, ChatReply, GenerationOutcome};
pub use db::Database;
pub use llm::{ChatModel, OpenAiChatClient};
pub use server::{build_router, run_server};
pub use shared_state::AppState;
