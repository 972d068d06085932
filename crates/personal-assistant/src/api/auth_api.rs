//! Registration, login and profile endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use validator::Validate;

use super::{ApiError, AuthUser, ValidJson};
use crate::db::is_unique_violation;
use crate::db::user_store::{NewUser, ProfileUpdate};
use crate::shared_state::AppState;

fn check_timezone(name: &str) -> Result<(), ApiError> {
    name.parse::<Tz>()
        .map(|_| ())
        .map_err(|_| ApiError::validation(format!("Unknown time zone '{}'", name)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 150, message = "Username is required"))]
    pub username: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    #[validate(email)]
    pub email: Option<String>,
    #[serde(default)]
    #[validate(length(max = 150))]
    pub first_name: String,
    #[serde(default)]
    #[validate(length(max = 150))]
    pub last_name: String,
    pub timezone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: &'static str,
    pub token: String,
    pub user_id: i64,
    pub username: String,
    pub email: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let timezone = match req.timezone {
        Some(ref tz) => {
            check_timezone(tz)?;
            tz.clone()
        }
        None => state.config.default_timezone.name().to_string(),
    };

    let user = state
        .database
        .users
        .create_user(NewUser {
            username: &req.username,
            password: &req.password,
            email: req.email.as_deref(),
            first_name: &req.first_name,
            last_name: &req.last_name,
            timezone: &timezone,
        })
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::Conflict("A user with that username already exists.".into())
            } else {
                ApiError::Internal(e)
            }
        })?;
    let token = state.database.users.get_or_create_token(user.id)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User created successfully",
            token,
            user_id: user.id,
            username: user.username,
            email: user.email,
        }),
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .database
        .users
        .authenticate(&req.username, &req.password)?
        .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".into()))?;
    let token = state.database.users.get_or_create_token(user.id)?;
    info!("User {} logged in", user.id);

    Ok(Json(json!({
        "token": token,
        "user_id": user.id,
        "username": user.username,
        "email": user.email,
        "first_name": user.first_name,
        "last_name": user.last_name,
    })))
}

pub async fn logout(State(state): State<AppState>, user: AuthUser) -> Result<impl IntoResponse, ApiError> {
    state.database.users.revoke_tokens(user.id())?;
    Ok(Json(json!({ "message": "Logged out successfully" })))
}

fn profile_body(state: &AppState, user_id: i64) -> Result<serde_json::Value, ApiError> {
    let user = state
        .database
        .users
        .get_user(user_id)?
        .ok_or_else(|| ApiError::not_found("User"))?;
    let timezone = state
        .database
        .users
        .get_timezone(user_id)?
        .unwrap_or_else(|| state.config.default_timezone.name().to_string());
    Ok(json!({
        "id": user.id,
        "username": user.username,
        "email": user.email,
        "first_name": user.first_name,
        "last_name": user.last_name,
        "date_joined": user.date_joined,
        "last_login": user.last_login,
        "timezone": timezone,
    }))
}

pub async fn get_profile(State(state): State<AppState>, user: AuthUser) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(profile_body(&state, user.id())?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProfileRequest {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 150))]
    pub first_name: Option<String>,
    #[validate(length(max = 150))]
    pub last_name: Option<String>,
    pub timezone: Option<String>,
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(req): ValidJson<ProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(ref tz) = req.timezone {
        check_timezone(tz)?;
    }
    state.database.users.update_profile(
        user.id(),
        &ProfileUpdate {
            email: req.email,
            first_name: req.first_name,
            last_name: req.last_name,
            timezone: req.timezone,
        },
    )?;
    Ok(Json(profile_body(&state, user.id())?))
}
