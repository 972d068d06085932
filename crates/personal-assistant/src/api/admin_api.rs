//! Operational endpoints.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use super::{ApiError, AuthUser};
use crate::db::DatabaseStats;
use crate::shared_state::AppState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub version: &'static str,
    #[serde(flatten)]
    pub database: DatabaseStats,
}

/// `GET /healthz`
pub async fn health() -> &'static str {
    "OK"
}

/// `GET /api/admin/stats`
pub async fn db_stats(State(state): State<AppState>, _user: AuthUser) -> Result<impl IntoResponse, ApiError> {
    let database = state.database.get_stats()?;
    Ok(Json(StatsResponse {
        version: env!("CARGO_PKG_VERSION"),
        database,
    }))
}
