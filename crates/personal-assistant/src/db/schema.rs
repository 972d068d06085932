//! Row types, enumerations and the timestamp encoding shared by every store.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Encode a UTC instant for storage. Fixed-width microseconds plus `Z`
/// keeps lexicographic order equal to chronological order.
pub fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Lenient decoding of stored timestamps.
pub fn parse_db_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }
    None
}

/// Read a required timestamp column.
pub(crate) fn time_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_db_time(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid timestamp: {raw}").into(),
        )
    })
}

/// Read a nullable timestamp column.
pub(crate) fn opt_time_column(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => parse_db_time(&raw).map(Some).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                format!("invalid timestamp: {raw}").into(),
            )
        }),
        None => Ok(None),
    }
}

/// Read a JSON text column, tolerating empty or corrupt values.
pub(crate) fn json_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null))
}

/// Error returned when a stored or submitted enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Text-backed enums stored as their lowercase snake_case names.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: UnknownVariant| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_enum!(Priority, "priority", {
    Low => "low",
    Medium => "medium",
    High => "high",
});

impl Priority {
    /// Higher value sorts first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

text_enum!(TaskStatus, "task status", {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

text_enum!(Sender, "sender", {
    User => "user",
    Agent => "agent",
});

text_enum!(EmailPriority, "email priority", {
    Low => "low",
    Normal => "normal",
    High => "high",
});

impl Default for EmailPriority {
    fn default() -> Self {
        EmailPriority::Normal
    }
}

text_enum!(CommandType, "command type", {
    Calendar => "calendar",
    Tasks => "tasks",
    Email => "email",
    General => "general",
    System => "system",
});

text_enum!(CommandStatus, "command status", {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: i64,
    pub user_id: i64,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: i64,
    pub last_message_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub content: String,
    pub sender: Sender,
    pub message_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiCommand {
    pub id: i64,
    pub user_id: i64,
    pub message_id: i64,
    pub command_type: CommandType,
    pub original_text: String,
    pub parsed_intent: serde_json::Value,
    pub status: CommandStatus,
    pub result: serde_json::Value,
    pub error_message: Option<String>,
    pub processing_time: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserPreference {
    pub user_id: i64,
    pub preferred_ai_model: String,
    pub notification_settings: serde_json::Value,
    pub privacy_settings: serde_json::Value,
    pub custom_commands: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalendarEvent {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub priority: Priority,
    pub is_all_day: bool,
    pub google_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CalendarEvent {
    pub fn duration_hours(&self) -> f64 {
        (self.end_time - self.start_time).num_seconds() as f64 / 3600.0
    }

    /// Whether the event starts on the same local calendar day as `now`.
    pub fn is_today<Tz: TimeZone>(&self, tz: &Tz, now: DateTime<Utc>) -> bool {
        self.start_time.with_timezone(tz).date_naive() == now.with_timezone(tz).date_naive()
    }

    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.start_time > now
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskCategory {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Due instant in the past and not completed, evaluated at `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match self.due_date {
            Some(due) if !self.is_completed() => due < now,
            _ => false,
        }
    }

    pub fn days_until_due(&self, now: DateTime<Utc>) -> Option<i64> {
        self.due_date.map(|due| (due - now).num_days())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailAccount {
    pub id: i64,
    pub user_id: i64,
    pub email_address: String,
    pub provider: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub is_active: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailLabel {
    pub id: i64,
    pub email_id: i64,
    pub name: String,
    pub gmail_label_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Email {
    pub id: i64,
    pub account_id: i64,
    pub account_email: String,
    pub gmail_message_id: String,
    pub thread_id: Option<String>,
    pub subject: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub recipient_emails: Vec<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub snippet: Option<String>,
    pub is_read: bool,
    pub is_important: bool,
    pub is_starred: bool,
    pub priority: EmailPriority,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub labels: Vec<EmailLabel>,
}

impl Email {
    pub fn is_recent(&self, now: DateTime<Utc>) -> bool {
        (now - self.received_at).num_days() < 7
    }

    pub fn sender_display(&self) -> &str {
        match self.sender_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.sender_email,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub total_users: i64,
    pub total_conversations: i64,
    pub total_messages: i64,
    pub total_events: i64,
    pub total_tasks: i64,
    pub total_emails: i64,
    pub database_size_bytes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task(status: TaskStatus, due: Option<DateTime<Utc>>) -> Task {
        let now = Utc::now();
        Task {
            id: 1,
            user_id: 1,
            title: "t".into(),
            description: None,
            priority: Priority::Medium,
            status,
            category_id: None,
            category_name: None,
            due_date: due,
            completed_at: None,
            estimated_hours: None,
            actual_hours: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn db_time_sorts_chronologically() {
        let a = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let b = a + Duration::microseconds(1);
        let c = a + Duration::days(400);
        let mut encoded = vec![to_db_time(&c), to_db_time(&a), to_db_time(&b)];
        encoded.sort();
        assert_eq!(encoded, vec![to_db_time(&a), to_db_time(&b), to_db_time(&c)]);
        assert_eq!(parse_db_time(&to_db_time(&b)), Some(b));
    }

    #[test]
    fn parse_db_time_accepts_sqlite_format() {
        let parsed = parse_db_time("2024-05-01 10:30:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap());
        assert!(parse_db_time("not a date").is_none());
    }

    #[test]
    fn enums_round_trip_through_text() {
        assert_eq!("in_progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!(Priority::High.as_str(), "high");
        assert!("urgent".parse::<Priority>().is_err());
        assert!(Priority::High.rank() > Priority::Medium.rank());
    }

    #[test]
    fn overdue_uses_evaluation_instant() {
        let now = Utc::now();
        let t = task(TaskStatus::Pending, Some(now - Duration::hours(1)));
        assert!(t.is_overdue(now));
        assert!(!t.is_overdue(now - Duration::hours(2)));

        let done = task(TaskStatus::Completed, Some(now - Duration::days(3)));
        assert!(!done.is_overdue(now));

        let undated = task(TaskStatus::Pending, None);
        assert!(!undated.is_overdue(now));
        assert_eq!(undated.days_until_due(now), None);
    }
}
