//! Email account and mirrored-message endpoints. Messages are only read and
//! flagged here; fetching from the provider happens elsewhere and lands
//! through the ingest route.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use super::{ApiError, AuthUser, ValidJson};
use crate::db::{
    is_unique_violation, Email, EmailFilter, EmailPriority, EmailUpdate, NewEmail, NewEmailAccount,
};
use crate::shared_state::AppState;

const DEFAULT_PROVIDER: &str = "gmail";

#[derive(Debug, Serialize)]
pub struct EmailView {
    #[serde(flatten)]
    pub email: Email,
    pub is_recent: bool,
    pub sender_display: String,
}

impl EmailView {
    fn new(email: Email, now: DateTime<Utc>) -> Self {
        Self {
            is_recent: email.is_recent(now),
            sender_display: email.sender_display().to_string(),
            email,
        }
    }
}

fn conflict_or_internal(err: anyhow::Error, message: String) -> ApiError {
    if is_unique_violation(&err) {
        ApiError::Conflict(message)
    } else {
        ApiError::Internal(err)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AccountRequest {
    #[serde(default)]
    #[validate(email(message = "Enter a valid email address"))]
    pub email_address: String,
    #[validate(length(min = 1, max = 50))]
    pub provider: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// `GET /api/email/accounts`
pub async fn list_accounts(State(state): State<AppState>, user: AuthUser) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.database.emails.list_accounts(user.id())?))
}

/// `POST /api/email/accounts`
pub async fn create_account(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(req): ValidJson<AccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .database
        .emails
        .create_account(
            user.id(),
            &NewEmailAccount {
                email_address: req.email_address.clone(),
                provider: req.provider.unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
                access_token: req.access_token,
                refresh_token: req.refresh_token,
            },
        )
        .map_err(|e| conflict_or_internal(e, format!("Account {} is already linked", req.email_address)))?;
    Ok((StatusCode::CREATED, Json(account)))
}

#[derive(Debug, Deserialize)]
pub struct LabelRequest {
    pub name: String,
    pub gmail_label_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct IngestRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 100, message = "gmail_message_id is required"))]
    pub gmail_message_id: String,
    pub thread_id: Option<String>,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub subject: String,
    #[serde(default)]
    #[validate(email)]
    pub sender_email: String,
    pub sender_name: Option<String>,
    #[serde(default)]
    pub recipient_emails: Vec<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub snippet: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_important: bool,
    #[serde(default)]
    pub is_starred: bool,
    #[serde(default)]
    pub priority: EmailPriority,
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Vec<LabelRequest>,
}

/// `POST /api/email/accounts/:id/messages`
pub async fn ingest_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(account_id): Path<i64>,
    ValidJson(req): ValidJson<IngestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .database
        .emails
        .get_account(user.id(), account_id)?
        .ok_or_else(|| ApiError::not_found("Account"))?;

    let message_id = req.gmail_message_id.clone();
    let email = state
        .database
        .emails
        .ingest_email(
            account_id,
            &NewEmail {
                gmail_message_id: req.gmail_message_id,
                thread_id: req.thread_id,
                subject: req.subject,
                sender_email: req.sender_email,
                sender_name: req.sender_name,
                recipient_emails: req.recipient_emails,
                body_text: req.body_text,
                body_html: req.body_html,
                snippet: req.snippet,
                is_read: req.is_read,
                is_important: req.is_important,
                is_starred: req.is_starred,
                priority: req.priority,
                received_at: req.received_at,
                labels: req
                    .labels
                    .into_iter()
                    .map(|l| (l.name, l.gmail_label_id))
                    .collect(),
            },
        )
        .map_err(|e| conflict_or_internal(e, format!("Message {} already ingested", message_id)))?;
    Ok((StatusCode::CREATED, Json(EmailView::new(email, Utc::now()))))
}

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub is_read: Option<bool>,
    pub account: Option<i64>,
}

/// `GET /api/email/messages`
pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<EmailQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = EmailFilter {
        is_read: query.is_read,
        account_id: query.account,
    };
    let now = Utc::now();
    let emails: Vec<_> = state
        .database
        .emails
        .list_emails(user.id(), &filter)?
        .into_iter()
        .map(|e| EmailView::new(e, now))
        .collect();
    Ok(Json(emails))
}

/// `GET /api/email/messages/:id`
pub async fn get_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(email_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let email = state
        .database
        .emails
        .get_email(user.id(), email_id)?
        .ok_or_else(|| ApiError::not_found("Email"))?;
    Ok(Json(EmailView::new(email, Utc::now())))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EmailPatch {
    pub is_read: Option<bool>,
    pub is_important: Option<bool>,
    pub is_starred: Option<bool>,
    pub priority: Option<EmailPriority>,
}

/// `PATCH /api/email/messages/:id`
pub async fn patch_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(email_id): Path<i64>,
    ValidJson(req): ValidJson<EmailPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let email = state
        .database
        .emails
        .update_email(
            user.id(),
            email_id,
            &EmailUpdate {
                is_read: req.is_read,
                is_important: req.is_important,
                is_starred: req.is_starred,
                priority: req.priority,
            },
        )?
        .ok_or_else(|| ApiError::not_found("Email"))?;
    Ok(Json(EmailView::new(email, Utc::now())))
}

/// `GET /api/email/unread-count`
pub async fn unread_count(State(state): State<AppState>, user: AuthUser) -> Result<impl IntoResponse, ApiError> {
    let unread = state.database.emails.unread_count(user.id())?;
    Ok(Json(json!({ "unread": unread })))
}
