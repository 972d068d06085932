//! AI agent endpoints: chat, conversation history, command log, preferences.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use validator::Validate;

use super::{ApiError, AuthUser, ValidJson};
use crate::db::preference_store::PreferenceUpdate;
use crate::shared_state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    pub conversation_id: Option<i64>,
}

/// `POST /api/ai/chat`
pub async fn chat(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(req): ValidJson<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!("Chat request from user {} (conversation {:?})", user.id(), req.conversation_id);
    let reply = state
        .chat
        .chat(user.id(), &req.message, req.conversation_id)
        .await?;
    Ok(Json(reply))
}

/// `GET /api/ai/conversations`
pub async fn list_conversations(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state.database.conversations.list_conversations(user.id())?;
    Ok(Json(conversations))
}

/// `GET /api/ai/conversations/:id`
pub async fn get_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .database
        .conversations
        .get_conversation(user.id(), conversation_id)?
        .ok_or_else(|| ApiError::not_found("Conversation"))?;
    let messages = state.database.conversations.get_messages(conversation.id)?;
    Ok(Json(json!({
        "conversation": conversation,
        "messages": messages,
    })))
}

/// `GET /api/ai/commands`
pub async fn list_commands(State(state): State<AppState>, user: AuthUser) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.database.commands.list(user.id())?))
}

/// `GET /api/ai/preferences`
pub async fn get_preferences(State(state): State<AppState>, user: AuthUser) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.database.preferences.get_or_create(user.id())?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PreferencesRequest {
    #[validate(length(min = 1, max = 50))]
    pub preferred_ai_model: Option<String>,
    pub notification_settings: Option<serde_json::Value>,
    pub privacy_settings: Option<serde_json::Value>,
    pub custom_commands: Option<serde_json::Value>,
}

/// `PUT /api/ai/preferences`
pub async fn update_preferences(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(req): ValidJson<PreferencesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    for (name, value) in [
        ("notification_settings", &req.notification_settings),
        ("privacy_settings", &req.privacy_settings),
    ] {
        if matches!(value, Some(v) if !v.is_object()) {
            return Err(ApiError::validation(format!("{} must be an object", name)));
        }
    }
    if matches!(&req.custom_commands, Some(v) if !v.is_array()) {
        return Err(ApiError::validation("custom_commands must be a list"));
    }

    let updated = state.database.preferences.update(
        user.id(),
        &PreferenceUpdate {
            preferred_ai_model: req.preferred_ai_model,
            notification_settings: req.notification_settings,
            privacy_settings: req.privacy_settings,
            custom_commands: req.custom_commands,
        },
    )?;
    Ok(Json(updated))
}
