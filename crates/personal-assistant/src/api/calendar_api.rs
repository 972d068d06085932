//! Calendar event endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use super::{double_option, ApiError, AuthUser, ValidJson};
use crate::context_engine::context_builder::{local_day_start, resolve_timezone};
use crate::db::{parse_db_time, CalendarEvent, EventFilter, EventUpdate, NewEvent, Priority};
use crate::shared_state::AppState;

const UPCOMING_DAYS: i64 = 7;

/// An event with its request-time derived fields.
#[derive(Debug, Serialize)]
pub struct EventView {
    #[serde(flatten)]
    pub event: CalendarEvent,
    pub duration_hours: f64,
    pub is_today: bool,
    pub is_upcoming: bool,
}

impl EventView {
    fn new(event: CalendarEvent, tz: &Tz, now: DateTime<Utc>) -> Self {
        Self {
            duration_hours: event.duration_hours(),
            is_today: event.is_today(tz, now),
            is_upcoming: event.is_upcoming(now),
            event,
        }
    }
}

fn user_tz(state: &AppState, user_id: i64) -> Result<Tz, ApiError> {
    let stored = state.database.users.get_timezone(user_id)?;
    Ok(resolve_timezone(stored.as_deref(), state.config.default_timezone))
}

fn views(state: &AppState, user_id: i64, events: Vec<CalendarEvent>) -> Result<Vec<EventView>, ApiError> {
    let tz = user_tz(state, user_id)?;
    let now = Utc::now();
    Ok(events.into_iter().map(|e| EventView::new(e, &tz, now)).collect())
}

/// Cut both ends to stored (microsecond) precision, then require `start < end`.
fn checked_interval(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
    let (start, end) = (start.trunc_subsecs(6), end.trunc_subsecs(6));
    if start >= end {
        return Err(ApiError::validation("End time must be after start time"));
    }
    Ok((start, end))
}

#[derive(Debug, Deserialize, Validate)]
pub struct EventRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    pub description: Option<String>,
    #[validate(length(max = 300))]
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub is_all_day: bool,
    pub google_event_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EventPatch {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub location: Option<Option<String>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub is_all_day: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub google_event_id: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

fn parse_bound(name: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    match raw {
        Some(value) => parse_db_time(value)
            .map(Some)
            .ok_or_else(|| ApiError::validation(format!("Invalid {}: {}", name, value))),
        None => Ok(None),
    }
}

/// `GET /api/calendar/events`
pub async fn list_events(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<EventQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = EventFilter {
        start_from: parse_bound("start_date", query.start_date.as_deref())?,
        end_until: parse_bound("end_date", query.end_date.as_deref())?,
    };
    let events = state.database.calendar.list_events(user.id(), &filter)?;
    Ok(Json(views(&state, user.id(), events)?))
}

/// `POST /api/calendar/events`
pub async fn create_event(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(req): ValidJson<EventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (start_time, end_time) = checked_interval(req.start_time, req.end_time)?;
    let event = state.database.calendar.create_event(
        user.id(),
        &NewEvent {
            title: req.title,
            description: req.description,
            location: req.location,
            start_time,
            end_time,
            priority: req.priority,
            is_all_day: req.is_all_day,
            google_event_id: req.google_event_id,
        },
    )?;
    let tz = user_tz(&state, user.id())?;
    Ok((StatusCode::CREATED, Json(EventView::new(event, &tz, Utc::now()))))
}

/// `GET /api/calendar/events/:id`
pub async fn get_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let event = state
        .database
        .calendar
        .get_event(user.id(), event_id)?
        .ok_or_else(|| ApiError::not_found("Event"))?;
    let tz = user_tz(&state, user.id())?;
    Ok(Json(EventView::new(event, &tz, Utc::now())))
}

fn apply_update(state: &AppState, user_id: i64, event_id: i64, mut update: EventUpdate) -> Result<EventView, ApiError> {
    let current = state
        .database
        .calendar
        .get_event(user_id, event_id)?
        .ok_or_else(|| ApiError::not_found("Event"))?;
    let (start, end) = checked_interval(
        update.start_time.unwrap_or(current.start_time),
        update.end_time.unwrap_or(current.end_time),
    )?;
    update.start_time = update.start_time.map(|_| start);
    update.end_time = update.end_time.map(|_| end);
    let event = state
        .database
        .calendar
        .update_event(user_id, event_id, &update)?
        .ok_or_else(|| ApiError::not_found("Event"))?;
    let tz = user_tz(state, user_id)?;
    Ok(EventView::new(event, &tz, Utc::now()))
}

/// `PUT /api/calendar/events/:id`
pub async fn replace_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<i64>,
    ValidJson(req): ValidJson<EventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let update = EventUpdate {
        title: Some(req.title),
        description: Some(req.description),
        location: Some(req.location),
        start_time: Some(req.start_time),
        end_time: Some(req.end_time),
        priority: Some(req.priority),
        is_all_day: Some(req.is_all_day),
        google_event_id: Some(req.google_event_id),
    };
    Ok(Json(apply_update(&state, user.id(), event_id, update)?))
}

/// `PATCH /api/calendar/events/:id`
pub async fn patch_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<i64>,
    ValidJson(req): ValidJson<EventPatch>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(Some(ref location)) = req.location {
        if location.chars().count() > 300 {
            return Err(ApiError::validation("location: must be at most 300 characters"));
        }
    }
    let update = EventUpdate {
        title: req.title,
        description: req.description,
        location: req.location,
        start_time: req.start_time,
        end_time: req.end_time,
        priority: req.priority,
        is_all_day: req.is_all_day,
        google_event_id: req.google_event_id,
    };
    Ok(Json(apply_update(&state, user.id(), event_id, update)?))
}

/// `DELETE /api/calendar/events/:id`
pub async fn delete_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.database.calendar.delete_event(user.id(), event_id)? {
        return Err(ApiError::not_found("Event"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/calendar/events/today`, using the caller's zone.
pub async fn today_events(State(state): State<AppState>, user: AuthUser) -> Result<impl IntoResponse, ApiError> {
    let tz = user_tz(&state, user.id())?;
    let now = Utc::now();
    let today = now.with_timezone(&tz).date_naive();
    let start = local_day_start(&tz, today);
    let end = local_day_start(&tz, today + Duration::days(1));

    let events = state.database.calendar.events_starting_between(user.id(), start, end)?;
    let events: Vec<_> = events.into_iter().map(|e| EventView::new(e, &tz, now)).collect();
    Ok(Json(json!({ "count": events.len(), "events": events })))
}

/// `GET /api/calendar/events/upcoming`: the next seven days, both ends included.
pub async fn upcoming_events(State(state): State<AppState>, user: AuthUser) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let events = state
        .database
        .calendar
        .events_starting_through(user.id(), now, now + Duration::days(UPCOMING_DAYS))?;
    let events = views(&state, user.id(), events)?;
    Ok(Json(json!({ "count": events.len(), "events": events })))
}
