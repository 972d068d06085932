//! Timezone-aware snapshot of a user's calendar, tasks and inbox.

use crate::config::Config;
use crate::db::{CalendarEvent, Database, Priority, Task};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

pub const NO_LOCATION: &str = "No location";
pub const NO_DUE_DATE: &str = "No due date";

#[derive(Debug, Clone)]
pub struct ContextBuilderConfig {
    pub default_timezone: Tz,
    /// Days either side of today included in the event fetch.
    pub event_window_days: i64,
    pub pending_task_limit: usize,
}

impl Default for ContextBuilderConfig {
    fn default() -> Self {
        Self {
            default_timezone: crate::config::FALLBACK_TIMEZONE,
            event_window_days: 2,
            pending_task_limit: 5,
        }
    }
}

impl From<&Config> for ContextBuilderConfig {
    fn from(config: &Config) -> Self {
        Self {
            default_timezone: config.default_timezone,
            event_window_days: config.event_window_days,
            pending_task_limit: config.pending_task_limit,
        }
    }
}

/// Position of a date relative to the evaluation date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayTag {
    Yesterday,
    Today,
    Tomorrow,
}

pub fn classify_day(date: NaiveDate, today: NaiveDate) -> Option<DayTag> {
    match (date - today).num_days() {
        -1 => Some(DayTag::Yesterday),
        0 => Some(DayTag::Today),
        1 => Some(DayTag::Tomorrow),
        _ => None,
    }
}

/// Parse a stored zone name, falling back to `default` when absent or unknown.
pub fn resolve_timezone(stored: Option<&str>, default: Tz) -> Tz {
    match stored {
        Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
            warn!("Unknown time zone '{}', using {}", name, default);
            default
        }),
        None => default,
    }
}

/// First instant of `date` in `tz`. Zones whose midnight falls in a DST gap
/// start the day at the first valid local hour.
pub fn local_day_start(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::default());
    for hour in 0..24 {
        if let Some(dt) = tz.from_local_datetime(&(midnight + Duration::hours(hour))).earliest() {
            return dt.with_timezone(&Utc);
        }
    }
    Utc.from_utc_datetime(&midnight)
}

/// Half-open UTC range covering local dates `today - days ..= today + days`.
pub fn event_window(tz: &Tz, today: NaiveDate, days: i64) -> (DateTime<Utc>, DateTime<Utc>) {
    let first = today - Duration::days(days);
    let after_last = today + Duration::days(days + 1);
    (local_day_start(tz, first), local_day_start(tz, after_last))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContextEvent {
    pub title: String,
    pub date: String,
    pub start_time: String,
    pub location: String,
    pub is_today: bool,
    pub is_yesterday: bool,
    pub is_tomorrow: bool,
}

impl ContextEvent {
    fn from_event(event: &CalendarEvent, tz: &Tz, today: NaiveDate) -> Self {
        let local = event.start_time.with_timezone(tz);
        let tag = classify_day(local.date_naive(), today);
        Self {
            title: event.title.clone(),
            date: local.format("%Y-%m-%d").to_string(),
            start_time: local.format("%H:%M").to_string(),
            location: event
                .location
                .as_deref()
                .filter(|l| !l.is_empty())
                .unwrap_or(NO_LOCATION)
                .to_string(),
            is_today: tag == Some(DayTag::Today),
            is_yesterday: tag == Some(DayTag::Yesterday),
            is_tomorrow: tag == Some(DayTag::Tomorrow),
        }
    }

    pub fn tag(&self) -> Option<DayTag> {
        if self.is_yesterday {
            Some(DayTag::Yesterday)
        } else if self.is_today {
            Some(DayTag::Today)
        } else if self.is_tomorrow {
            Some(DayTag::Tomorrow)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContextTask {
    pub title: String,
    pub priority: Priority,
    pub due_date: String,
}

impl ContextTask {
    fn from_task(task: &Task, tz: &Tz) -> Self {
        Self {
            title: task.title.clone(),
            priority: task.priority,
            due_date: task
                .due_date
                .map(|due| due.with_timezone(tz).format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| NO_DUE_DATE.to_string()),
        }
    }
}

/// Facts assembled for one chat exchange.
#[derive(Debug, Clone)]
pub struct ContextBundle {
    pub timezone: Tz,
    pub local_now: DateTime<Tz>,
    pub today: NaiveDate,
    pub events: Vec<ContextEvent>,
    pub pending_tasks: Vec<ContextTask>,
    pub unread_emails: i64,
}

impl ContextBundle {
    pub fn current_time(&self) -> String {
        self.local_now.format("%Y-%m-%d %H:%M:%S %Z").to_string()
    }

    pub fn current_date(&self) -> String {
        self.today.format("%Y-%m-%d").to_string()
    }

    pub fn events_on(&self, tag: DayTag) -> Vec<&ContextEvent> {
        self.events.iter().filter(|e| e.tag() == Some(tag)).collect()
    }
}

pub struct ContextBuilder {
    database: Arc<Database>,
    config: ContextBuilderConfig,
}

impl ContextBuilder {
    pub fn new(database: Arc<Database>, config: ContextBuilderConfig) -> Self {
        Self { database, config }
    }

    pub fn user_timezone(&self, user_id: i64) -> Tz {
        let stored = match self.database.users.get_timezone(user_id) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, user_id, "Failed to load user time zone");
                None
            }
        };
        resolve_timezone(stored.as_deref(), self.config.default_timezone)
    }

    /// Snapshot for `user_id` evaluated at `now`.
    pub fn build(&self, user_id: i64, now: DateTime<Utc>) -> anyhow::Result<ContextBundle> {
        let tz = self.user_timezone(user_id);
        let local_now = now.with_timezone(&tz);
        let today = local_now.date_naive();

        let (start, end) = event_window(&tz, today, self.config.event_window_days);
        let events = self
            .database
            .calendar
            .events_starting_between(user_id, start, end)?
            .iter()
            .map(|event| ContextEvent::from_event(event, &tz, today))
            .collect::<Vec<_>>();

        let pending_tasks = self
            .database
            .tasks
            .pending_tasks(user_id, Some(self.config.pending_task_limit))?
            .iter()
            .map(|task| ContextTask::from_task(task, &tz))
            .collect::<Vec<_>>();

        let unread_emails = match self.database.emails.unread_count(user_id) {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, user_id, "Email lookup failed; reporting zero unread");
                0
            }
        };

        debug!(
            "Context for user {}: {} events, {} pending tasks, {} unread emails ({})",
            user_id,
            events.len(),
            pending_tasks.len(),
            unread_emails,
            tz
        );

        Ok(ContextBundle {
            timezone: tz,
            local_now,
            today,
            events,
            pending_tasks,
            unread_emails,
        })
    }
}
