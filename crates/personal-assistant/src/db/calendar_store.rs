use crate::db::schema::*;
use crate::db::{get_conn, DbPool};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub priority: Priority,
    pub is_all_day: bool,
    pub google_event_id: Option<String>,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct EventUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub location: Option<Option<String>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub is_all_day: Option<bool>,
    pub google_event_id: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Events starting at or after this instant.
    pub start_from: Option<DateTime<Utc>>,
    /// Events ending at or before this instant.
    pub end_until: Option<DateTime<Utc>>,
}

pub struct CalendarStore {
    pool: DbPool,
}

const EVENT_COLUMNS: &str = "id, user_id, title, description, location, start_time, end_time,
     priority, is_all_day, google_event_id, created_at, updated_at";

impl CalendarStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<CalendarEvent> {
        Ok(CalendarEvent {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            location: row.get(4)?,
            start_time: time_column(row, 5)?,
            end_time: time_column(row, 6)?,
            priority: row.get(7)?,
            is_all_day: row.get(8)?,
            google_event_id: row.get(9)?,
            created_at: time_column(row, 10)?,
            updated_at: time_column(row, 11)?,
        })
    }

    /// Insert an event. Callers validate `start_time < end_time` first.
    pub fn create_event(&self, user_id: i64, event: &NewEvent) -> anyhow::Result<CalendarEvent> {
        let conn = get_conn(&self.pool)?;
        let now = to_db_time(&Utc::now());
        conn.execute(
            "INSERT INTO calendar_events
             (user_id, title, description, location, start_time, end_time, priority, is_all_day,
              google_event_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                user_id,
                event.title,
                event.description,
                event.location,
                to_db_time(&event.start_time),
                to_db_time(&event.end_time),
                event.priority,
                event.is_all_day,
                event.google_event_id,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!("Created calendar event {} for user {}", id, user_id);

        conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM calendar_events WHERE id = ?1"),
            [id],
            Self::row_to_event,
        )
        .map_err(Into::into)
    }

    pub fn get_event(&self, user_id: i64, event_id: i64) -> anyhow::Result<Option<CalendarEvent>> {
        let conn = get_conn(&self.pool)?;
        let event = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM calendar_events WHERE id = ?1 AND user_id = ?2"),
                params![event_id, user_id],
                Self::row_to_event,
            )
            .optional()?;
        Ok(event)
    }

    /// The caller's events ordered by start time.
    pub fn list_events(&self, user_id: i64, filter: &EventFilter) -> anyhow::Result<Vec<CalendarEvent>> {
        let conn = get_conn(&self.pool)?;
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM calendar_events WHERE user_id = ?1");
        let mut args: Vec<Value> = vec![Value::Integer(user_id)];
        if let Some(start) = filter.start_from {
            args.push(Value::Text(to_db_time(&start)));
            sql.push_str(&format!(" AND start_time >= ?{}", args.len()));
        }
        if let Some(end) = filter.end_until {
            args.push(Value::Text(to_db_time(&end)));
            sql.push_str(&format!(" AND end_time <= ?{}", args.len()));
        }
        sql.push_str(" ORDER BY start_time, id");

        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params_from_iter(args), Self::row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Events whose start instant lies in `[start, end)`, ordered by start time.
    pub fn events_starting_between(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<CalendarEvent>> {
        self.events_starting_in(user_id, start, end, "<")
    }

    /// Events whose start instant lies in `[start, end]`.
    pub fn events_starting_through(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<CalendarEvent>> {
        self.events_starting_in(user_id, start, end, "<=")
    }

    fn events_starting_in(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        upper: &str,
    ) -> anyhow::Result<Vec<CalendarEvent>> {
        let conn = get_conn(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM calendar_events
             WHERE user_id = ?1 AND start_time >= ?2 AND start_time {upper} ?3
             ORDER BY start_time, id"
        ))?;
        let events = stmt
            .query_map(
                params![user_id, to_db_time(&start), to_db_time(&end)],
                Self::row_to_event,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!("Found {} events for user {} in window", events.len(), user_id);
        Ok(events)
    }

    /// Apply `update` to the caller's event. Returns `None` when the event
    /// does not exist or belongs to someone else.
    pub fn update_event(
        &self,
        user_id: i64,
        event_id: i64,
        update: &EventUpdate,
    ) -> anyhow::Result<Option<CalendarEvent>> {
        let Some(mut event) = self.get_event(user_id, event_id)? else {
            return Ok(None);
        };
        if let Some(ref title) = update.title {
            event.title = title.clone();
        }
        if let Some(ref description) = update.description {
            event.description = description.clone();
        }
        if let Some(ref location) = update.location {
            event.location = location.clone();
        }
        if let Some(start) = update.start_time {
            event.start_time = start;
        }
        if let Some(end) = update.end_time {
            event.end_time = end;
        }
        if let Some(priority) = update.priority {
            event.priority = priority;
        }
        if let Some(all_day) = update.is_all_day {
            event.is_all_day = all_day;
        }
        if let Some(ref google_id) = update.google_event_id {
            event.google_event_id = google_id.clone();
        }
        if event.start_time >= event.end_time {
            anyhow::bail!("End time must be after start time");
        }
        event.updated_at = Utc::now();

        let conn = get_conn(&self.pool)?;
        conn.execute(
            "UPDATE calendar_events
             SET title = ?1, description = ?2, location = ?3, start_time = ?4, end_time = ?5,
                 priority = ?6, is_all_day = ?7, google_event_id = ?8, updated_at = ?9
             WHERE id = ?10 AND user_id = ?11",
            params![
                event.title,
                event.description,
                event.location,
                to_db_time(&event.start_time),
                to_db_time(&event.end_time),
                event.priority,
                event.is_all_day,
                event.google_event_id,
                to_db_time(&event.updated_at),
                event_id,
                user_id,
            ],
        )?;
        debug!("Updated calendar event {}", event_id);
        Ok(Some(event))
    }

    pub fn delete_event(&self, user_id: i64, event_id: i64) -> anyhow::Result<bool> {
        let conn = get_conn(&self.pool)?;
        let deleted = conn.execute(
            "DELETE FROM calendar_events WHERE id = ?1 AND user_id = ?2",
            params![event_id, user_id],
        )?;
        if deleted > 0 {
            info!("Deleted calendar event {} for user {}", event_id, user_id);
        }
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::user_store::NewUser;
    use crate::db::Database;
    use chrono::{Duration, TimeZone};

    fn setup() -> (Database, i64) {
        let db = Database::new_in_memory().unwrap();
        let user = db
            .users
            .create_user(NewUser {
                username: "cal",
                password: "pw",
                email: None,
                first_name: "",
                last_name: "",
                timezone: "UTC",
            })
            .unwrap();
        (db, user.id)
    }

    fn event(title: &str, start: DateTime<Utc>, hours: i64) -> NewEvent {
        NewEvent {
            title: title.to_string(),
            description: None,
            location: Some("Room 4".into()),
            start_time: start,
            end_time: start + Duration::hours(hours),
            priority: Priority::High,
            is_all_day: false,
            google_event_id: None,
        }
    }

    #[test]
    fn create_and_read_back_preserves_fields() {
        let (db, user) = setup();
        let start = Utc.with_ymd_and_hms(2024, 6, 3, 14, 30, 0).unwrap();
        let created = db.calendar.create_event(user, &event("Standup", start, 1)).unwrap();

        let read = db.calendar.get_event(user, created.id).unwrap().unwrap();
        assert_eq!(read.title, "Standup");
        assert_eq!(read.start_time, start);
        assert_eq!(read.end_time, start + Duration::hours(1));
        assert_eq!(read.priority, Priority::High);
        assert_eq!(read.duration_hours(), 1.0);
        assert!(db.calendar.get_event(user + 1, created.id).unwrap().is_none());
    }

    #[test]
    fn window_query_is_half_open_on_start() {
        let (db, user) = setup();
        let base = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        db.calendar.create_event(user, &event("at start", base, 1)).unwrap();
        db.calendar.create_event(user, &event("inside", base + Duration::hours(5), 1)).unwrap();
        db.calendar.create_event(user, &event("at end", base + Duration::days(1), 1)).unwrap();

        let found = db
            .calendar
            .events_starting_between(user, base, base + Duration::days(1))
            .unwrap();
        let titles: Vec<_> = found.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["at start", "inside"]);
    }

    #[test]
    fn through_query_includes_the_final_instant() {
        let (db, user) = setup();
        let base = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        db.calendar.create_event(user, &event("at start", base, 1)).unwrap();
        db.calendar.create_event(user, &event("at end", base + Duration::days(7), 1)).unwrap();
        db.calendar.create_event(user, &event("after", base + Duration::days(8), 1)).unwrap();

        let titles: Vec<_> = db
            .calendar
            .events_starting_through(user, base, base + Duration::days(7))
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["at start".to_string(), "at end".to_string()]);
    }

    #[test]
    fn list_filters_by_start_and_end() {
        let (db, user) = setup();
        let base = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        db.calendar.create_event(user, &event("early", base - Duration::days(2), 1)).unwrap();
        db.calendar.create_event(user, &event("mid", base, 1)).unwrap();
        db.calendar.create_event(user, &event("long", base, 72)).unwrap();

        let filter = EventFilter {
            start_from: Some(base - Duration::hours(1)),
            end_until: Some(base + Duration::days(1)),
        };
        let titles: Vec<_> = db
            .calendar
            .list_events(user, &filter)
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["mid".to_string()]);
        assert_eq!(db.calendar.list_events(user, &EventFilter::default()).unwrap().len(), 3);
    }

    #[test]
    fn update_rechecks_interval_and_delete_is_scoped() {
        let (db, user) = setup();
        let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let created = db.calendar.create_event(user, &event("Review", start, 2)).unwrap();

        let bad = EventUpdate { end_time: Some(start), ..Default::default() };
        assert!(db.calendar.update_event(user, created.id, &bad).is_err());

        let good = EventUpdate {
            title: Some("Design review".into()),
            location: Some(None),
            ..Default::default()
        };
        let updated = db.calendar.update_event(user, created.id, &good).unwrap().unwrap();
        assert_eq!(updated.title, "Design review");
        assert_eq!(updated.location, None);
        assert_eq!(updated.end_time, start + Duration::hours(2));

        assert!(db.calendar.update_event(user + 1, created.id, &good).unwrap().is_none());
        assert!(!db.calendar.delete_event(user + 1, created.id).unwrap());
        assert!(db.calendar.delete_event(user, created.id).unwrap());
        assert!(db.calendar.get_event(user, created.id).unwrap().is_none());
    }
}
