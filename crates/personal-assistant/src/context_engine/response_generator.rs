//! Prompt assembly and the model call, with failures folded into the result.

use super::context_builder::ContextBuilder;
use super::prompt::render_system_prompt;
use crate::config::Config;
use crate::db::{ChatMessage, Database, Sender};
use crate::llm::{ChatModel, CompletionRequest, Role, Turn};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

pub const FALLBACK_RESPONSE: &str =
    "I'm sorry, I'm having trouble processing your request right now. Please try again later.";

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Success { response: String, tokens_used: u64 },
    /// `response` is safe to show the user; `error` is for logs and diagnostics.
    Failure { response: String, error: String },
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationOutcome::Success { .. })
    }

    pub fn response(&self) -> &str {
        match self {
            GenerationOutcome::Success { response, .. } | GenerationOutcome::Failure { response, .. } => response,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub history_limit: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".into(),
            max_tokens: 500,
            temperature: 0.7,
            history_limit: 10,
        }
    }
}

impl From<&Config> for GeneratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            model: config.openai_model.clone(),
            max_tokens: config.max_output_tokens,
            temperature: config.temperature,
            history_limit: config.history_limit,
        }
    }
}

fn role_for(sender: Sender) -> Role {
    match sender {
        Sender::User => Role::User,
        Sender::Agent => Role::Assistant,
    }
}

/// System instruction, prior turns oldest first, then the new user message.
pub fn assemble_turns(system_prompt: String, history: &[ChatMessage], message: &str) -> Vec<Turn> {
    let mut turns = Vec::with_capacity(history.len() + 2);
    turns.push(Turn::new(Role::System, system_prompt));
    turns.extend(
        history
            .iter()
            .map(|m| Turn::new(role_for(m.sender), m.content.clone())),
    );
    turns.push(Turn::new(Role::User, message));
    turns
}

pub struct ResponseGenerator {
    database: Arc<Database>,
    context_builder: ContextBuilder,
    model: Arc<dyn ChatModel>,
    config: GeneratorConfig,
}

impl ResponseGenerator {
    pub fn new(
        database: Arc<Database>,
        context_builder: ContextBuilder,
        model: Arc<dyn ChatModel>,
        config: GeneratorConfig,
    ) -> Self {
        Self { database, context_builder, model, config }
    }

    /// Prior messages of the user's own conversation; a foreign or unknown id
    /// yields no history.
    fn history(&self, user_id: i64, conversation_id: Option<i64>) -> anyhow::Result<Vec<ChatMessage>> {
        let Some(id) = conversation_id else {
            return Ok(Vec::new());
        };
        match self.database.conversations.get_conversation(user_id, id)? {
            Some(conversation) => self
                .database
                .conversations
                .recent_messages(conversation.id, self.config.history_limit),
            None => {
                debug!("Conversation {} not found for user {}; starting without history", id, user_id);
                Ok(Vec::new())
            }
        }
    }

    async fn try_generate(
        &self,
        user_id: i64,
        message: &str,
        conversation_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(String, u64)> {
        let bundle = self.context_builder.build(user_id, now)?;
        let history = self.history(user_id, conversation_id)?;
        let turns = assemble_turns(render_system_prompt(&bundle), &history, message);

        let completion = self
            .model
            .complete(CompletionRequest {
                model: self.config.model.clone(),
                turns,
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            })
            .await?;
        Ok((completion.text.trim().to_string(), completion.total_tokens))
    }

    /// Never fails: every error becomes [`GenerationOutcome::Failure`].
    pub async fn generate(
        &self,
        user_id: i64,
        message: &str,
        conversation_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> GenerationOutcome {
        match self.try_generate(user_id, message, conversation_id, now).await {
            Ok((response, tokens_used)) => GenerationOutcome::Success { response, tokens_used },
            Err(e) => {
                warn!(error = %e, user_id, "AI response generation failed");
                GenerationOutcome::Failure {
                    response: FALLBACK_RESPONSE.to_string(),
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_engine::context_builder::ContextBuilderConfig;
    use crate::db::user_store::NewUser;
    use crate::llm::Completion;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every request and replies with a fixed result.
    struct RecordingModel {
        reply: Result<Completion, String>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl ChatModel for RecordingModel {
        async fn complete(&self, request: CompletionRequest) -> anyhow::Result<Completion> {
            self.seen.lock().unwrap().push(request);
            self.reply.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn setup(reply: Result<Completion, String>) -> (Arc<Database>, Arc<RecordingModel>, ResponseGenerator, i64, i64) {
        let db = Arc::new(Database::new_in_memory().unwrap());
        let mut ids = Vec::new();
        for name in ["alice", "bob"] {
            let user = db
                .users
                .create_user(NewUser {
                    username: name,
                    password: "pw",
                    email: None,
                    first_name: "",
                    last_name: "",
                    timezone: "UTC",
                })
                .unwrap();
            ids.push(user.id);
        }
        let model = Arc::new(RecordingModel { reply, seen: Mutex::new(Vec::new()) });
        let generator = ResponseGenerator::new(
            Arc::clone(&db),
            ContextBuilder::new(Arc::clone(&db), ContextBuilderConfig::default()),
            model.clone(),
            GeneratorConfig::default(),
        );
        (db, model, generator, ids[0], ids[1])
    }

    fn ok(text: &str, tokens: u64) -> Result<Completion, String> {
        Ok(Completion { text: text.into(), total_tokens: tokens })
    }

    #[test]
    fn turns_map_senders_to_roles() {
        let now = Utc::now();
        let msg = |sender, content: &str| ChatMessage {
            id: 0,
            conversation_id: 1,
            content: content.into(),
            sender,
            message_type: "text".into(),
            metadata: serde_json::json!({}),
            created_at: now,
        };
        let history = vec![msg(Sender::User, "q1"), msg(Sender::Agent, "a1")];
        let turns = assemble_turns("sys".into(), &history, "q2");
        let roles: Vec<_> = turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(turns[3].content, "q2");
    }

    #[tokio::test]
    async fn success_returns_trimmed_text_and_tokens() {
        let (_db, model, generator, alice, _) = setup(ok("  Sure thing.  ", 88));
        let outcome = generator.generate(alice, "hello", None, Utc::now()).await;
        assert_eq!(
            outcome,
            GenerationOutcome::Success { response: "Sure thing.".into(), tokens_used: 88 }
        );

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0].max_tokens, 500);
        assert_eq!(seen[0].turns.len(), 2);
        assert_eq!(seen[0].turns[0].role, Role::System);
    }

    #[tokio::test]
    async fn model_error_becomes_failure_with_fallback() {
        let (_db, _model, generator, alice, _) = setup(Err("connection reset".into()));
        let outcome = generator.generate(alice, "hello", None, Utc::now()).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.response(), FALLBACK_RESPONSE);
        match outcome {
            GenerationOutcome::Failure { error, .. } => assert!(error.contains("connection reset")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn history_is_loaded_only_for_owned_conversations() {
        let (db, model, generator, alice, bob) = setup(ok("ok", 1));
        let saved = db.conversations.save_exchange(alice, "first question", "first answer", None).unwrap();

        generator.generate(alice, "follow up", Some(saved.conversation_id), Utc::now()).await;
        generator.generate(bob, "snooping", Some(saved.conversation_id), Utc::now()).await;

        let seen = model.seen.lock().unwrap();
        let contents: Vec<_> = seen[0].turns.iter().skip(1).map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["first question", "first answer", "follow up"]);
        assert_eq!(seen[1].turns.len(), 2);
    }

    #[tokio::test]
    async fn history_window_is_capped() {
        let (db, model, generator, alice, _) = setup(ok("ok", 1));
        let conversation = db.conversations.create_conversation(alice, Some("long")).unwrap();
        let empty = serde_json::json!({});
        for i in 0..15 {
            let sender = if i % 2 == 0 { Sender::User } else { Sender::Agent };
            db.conversations
                .append_message(conversation, sender, &format!("m{i}"), "text", &empty)
                .unwrap();
        }
        generator.generate(alice, "next", Some(conversation), Utc::now()).await;

        let seen = model.seen.lock().unwrap();
        let turns = &seen[0].turns;
        assert_eq!(turns.len(), 12);
        assert_eq!(turns[1].content, "m5");
        assert_eq!(turns[10].content, "m14");
        assert_eq!(turns[10].role, Role::User);
    }
}
