use crate::config::Config;
use crate::context_engine::context_builder::{ContextBuilder, ContextBuilderConfig};
use crate::context_engine::response_generator::{GenerationOutcome, GeneratorConfig, ResponseGenerator};
use crate::db::command_store::NewCommand;
use crate::db::conversation_store::SavedExchange;
use crate::db::{CommandStatus, CommandType, Database};
use crate::llm::ChatModel;
use crate::metrics;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message is required")]
    EmptyMessage,
    #[error("Failed to generate AI response")]
    ModelFailure { detail: String },
}

/// Body returned for one chat exchange.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatReply {
    pub user_message: String,
    pub ai_response: String,
    pub conversation_id: Option<i64>,
    pub tokens_used: u64,
}

/// Runs a chat exchange end to end: generate, persist, audit.
pub struct ChatOrchestrator {
    database: Arc<Database>,
    generator: ResponseGenerator,
}

impl ChatOrchestrator {
    pub fn new(database: Arc<Database>, model: Arc<dyn ChatModel>, config: &Config) -> Self {
        let builder = ContextBuilder::new(Arc::clone(&database), ContextBuilderConfig::from(config));
        let generator = ResponseGenerator::new(
            Arc::clone(&database),
            builder,
            model,
            GeneratorConfig::from(config),
        );
        info!("Chat orchestrator initialized (model {})", config.openai_model);
        Self { database, generator }
    }

    pub async fn chat(
        &self,
        user_id: i64,
        message: &str,
        conversation_id: Option<i64>,
    ) -> Result<ChatReply, ChatError> {
        let message = message.trim();
        if message.is_empty() {
            metrics::inc_chat(metrics::OUTCOME_INVALID);
            return Err(ChatError::EmptyMessage);
        }

        let started = Instant::now();
        let (response, tokens_used) = match self
            .generator
            .generate(user_id, message, conversation_id, Utc::now())
            .await
        {
            GenerationOutcome::Success { response, tokens_used } => (response, tokens_used),
            GenerationOutcome::Failure { error, .. } => {
                metrics::inc_chat(metrics::OUTCOME_MODEL_FAILURE);
                return Err(ChatError::ModelFailure { detail: error });
            }
        };
        metrics::inc_chat(metrics::OUTCOME_SUCCESS);
        metrics::add_tokens(tokens_used);

        let saved = self
            .database
            .conversations
            .save_exchange(user_id, message, &response, conversation_id);
        match saved {
            Some(saved) => {
                self.record_command(user_id, message, &saved, tokens_used, started.elapsed().as_secs_f64())
            }
            None => metrics::inc_save_failure(),
        }

        Ok(ChatReply {
            user_message: message.to_string(),
            ai_response: response,
            conversation_id: saved.map(|s| s.conversation_id),
            tokens_used,
        })
    }

    fn record_command(&self, user_id: i64, message: &str, saved: &SavedExchange, tokens_used: u64, elapsed: f64) {
        let result = self
            .database
            .commands
            .record(NewCommand {
                user_id,
                message_id: saved.user_message_id,
                command_type: CommandType::General,
                original_text: message,
                parsed_intent: serde_json::json!({}),
            })
            .and_then(|id| {
                self.database.commands.finish(
                    id,
                    CommandStatus::Completed,
                    &serde_json::json!({
                        "tokens_used": tokens_used,
                        "conversation_id": saved.conversation_id,
                        "agent_message_id": saved.agent_message_id,
                    }),
                    None,
                    elapsed,
                )
            });
        if let Err(e) = result {
            warn!(error = %e, user_id, "Failed to record AI command");
        }
    }
}
