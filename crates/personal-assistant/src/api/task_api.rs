//! Task and task-category endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use super::{double_option, ApiError, AuthUser, ValidJson};
use crate::db::{is_unique_violation, NewTask, Priority, Task, TaskFilter, TaskStatus, TaskUpdate};
use crate::shared_state::AppState;

const DEFAULT_CATEGORY_COLOR: &str = "#007bff";

#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub is_completed: bool,
    pub is_overdue: bool,
    pub days_until_due: Option<i64>,
}

impl TaskView {
    fn new(task: Task, now: DateTime<Utc>) -> Self {
        Self {
            is_completed: task.is_completed(),
            is_overdue: task.is_overdue(now),
            days_until_due: task.days_until_due(now),
            task,
        }
    }
}

fn views(tasks: Vec<Task>) -> Vec<TaskView> {
    let now = Utc::now();
    tasks.into_iter().map(|t| TaskView::new(t, now)).collect()
}

/// A category id supplied by the caller must name one of their own categories.
fn check_category(state: &AppState, user_id: i64, category_id: Option<i64>) -> Result<(), ApiError> {
    if let Some(id) = category_id {
        if state.database.tasks.get_category(user_id, id)?.is_none() {
            return Err(ApiError::validation(format!("Invalid category: {}", id)));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct TaskRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TaskStatus,
    pub category_id: Option<i64>,
    pub due_date: Option<DateTime<Utc>>,
    #[validate(range(min = 0.0))]
    pub estimated_hours: Option<f64>,
    #[validate(range(min = 0.0))]
    pub actual_hours: Option<f64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TaskPatch {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub category_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub estimated_hours: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub actual_hours: Option<Option<f64>>,
}

#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub category: Option<i64>,
}

/// `GET /api/tasks/tasks`
pub async fn list_tasks(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<TaskQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = TaskFilter {
        status: query.status,
        priority: query.priority,
        category_id: query.category,
    };
    let tasks = state.database.tasks.list_tasks(user.id(), &filter)?;
    Ok(Json(views(tasks)))
}

/// `POST /api/tasks/tasks`
pub async fn create_task(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(req): ValidJson<TaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_category(&state, user.id(), req.category_id)?;
    let task = state.database.tasks.create_task(
        user.id(),
        &NewTask {
            title: req.title,
            description: req.description,
            priority: req.priority,
            status: req.status,
            category_id: req.category_id,
            due_date: req.due_date,
            estimated_hours: req.estimated_hours,
            actual_hours: req.actual_hours,
        },
    )?;
    Ok((StatusCode::CREATED, Json(TaskView::new(task, Utc::now()))))
}

/// `GET /api/tasks/tasks/:id`
pub async fn get_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .database
        .tasks
        .get_task(user.id(), task_id)?
        .ok_or_else(|| ApiError::not_found("Task"))?;
    Ok(Json(TaskView::new(task, Utc::now())))
}

fn apply_update(state: &AppState, user_id: i64, task_id: i64, update: TaskUpdate) -> Result<TaskView, ApiError> {
    let hours = [update.estimated_hours.flatten(), update.actual_hours.flatten()];
    if hours.iter().flatten().any(|h| *h < 0.0) {
        return Err(ApiError::validation("hours must not be negative"));
    }
    check_category(state, user_id, update.category_id.flatten())?;
    let task = state
        .database
        .tasks
        .update_task(user_id, task_id, &update)?
        .ok_or_else(|| ApiError::not_found("Task"))?;
    Ok(TaskView::new(task, Utc::now()))
}

/// `PUT /api/tasks/tasks/:id`
pub async fn replace_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    ValidJson(req): ValidJson<TaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let update = TaskUpdate {
        title: Some(req.title),
        description: Some(req.description),
        priority: Some(req.priority),
        status: Some(req.status),
        category_id: Some(req.category_id),
        due_date: Some(req.due_date),
        estimated_hours: Some(req.estimated_hours),
        actual_hours: Some(req.actual_hours),
    };
    Ok(Json(apply_update(&state, user.id(), task_id, update)?))
}

/// `PATCH /api/tasks/tasks/:id`
pub async fn patch_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    ValidJson(req): ValidJson<TaskPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let update = TaskUpdate {
        title: req.title,
        description: req.description,
        priority: req.priority,
        status: req.status,
        category_id: req.category_id,
        due_date: req.due_date,
        estimated_hours: req.estimated_hours,
        actual_hours: req.actual_hours,
    };
    Ok(Json(apply_update(&state, user.id(), task_id, update)?))
}

/// `DELETE /api/tasks/tasks/:id`
pub async fn delete_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.database.tasks.delete_task(user.id(), task_id)? {
        return Err(ApiError::not_found("Task"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/tasks/tasks/:id/complete`
pub async fn complete_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .database
        .tasks
        .complete_task(user.id(), task_id)?
        .ok_or_else(|| ApiError::not_found("Task"))?;
    Ok(Json(json!({
        "message": "Task marked as completed",
        "task": TaskView::new(task, Utc::now()),
    })))
}

/// `GET /api/tasks/tasks/pending`
pub async fn pending_tasks(State(state): State<AppState>, user: AuthUser) -> Result<impl IntoResponse, ApiError> {
    let tasks = views(state.database.tasks.pending_tasks(user.id(), None)?);
    Ok(Json(json!({ "count": tasks.len(), "tasks": tasks })))
}

/// `GET /api/tasks/tasks/stats`
pub async fn task_stats(State(state): State<AppState>, user: AuthUser) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.database.tasks.stats(user.id(), Utc::now())?))
}

fn is_hex_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Deserialize, Validate)]
pub struct CategoryRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,
    pub color: Option<String>,
}

/// `GET /api/tasks/categories`
pub async fn list_categories(State(state): State<AppState>, user: AuthUser) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.database.tasks.list_categories(user.id())?))
}

/// `POST /api/tasks/categories`
pub async fn create_category(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(req): ValidJson<CategoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let color = req.color.as_deref().unwrap_or(DEFAULT_CATEGORY_COLOR);
    if !is_hex_color(color) {
        return Err(ApiError::validation(format!("color: '{}' is not a #rrggbb value", color)));
    }
    let category = state
        .database
        .tasks
        .create_category(user.id(), &req.name, color)
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::Conflict(format!("Category '{}' already exists", req.name))
            } else {
                ApiError::Internal(e)
            }
        })?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// `DELETE /api/tasks/categories/:id`
pub async fn delete_category(
    State(state): State<AppState>,
    user: AuthUser,
    Path(category_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.database.tasks.delete_category(user.id(), category_id)? {
        return Err(ApiError::not_found("Category"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors() {
        assert!(is_hex_color("#007bff"));
        assert!(is_hex_color("#ABCDEF"));
        assert!(!is_hex_color("007bff"));
        assert!(!is_hex_color("#07bf"));
        assert!(!is_hex_color("#00zbff"));
    }
}
