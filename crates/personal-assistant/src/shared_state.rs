//! State shared by every request handler.

use std::sync::Arc;
use tracing::info;

use crate::{config::Config, context_engine::ChatOrchestrator, db::Database, llm::ChatModel};

/// Cheap to clone; everything inside is reference counted and read-only
/// after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub database: Arc<Database>,
    pub chat: Arc<ChatOrchestrator>,
}

impl AppState {
    pub fn new(config: Arc<Config>, database: Arc<Database>, model: Arc<dyn ChatModel>) -> Self {
        let chat = Arc::new(ChatOrchestrator::new(Arc::clone(&database), model, &config));
        info!("Application state initialized");
        Self { config, database, chat }
    }
}
