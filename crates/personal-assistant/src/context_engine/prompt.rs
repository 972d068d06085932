use super::context_builder::{ContextBundle, DayTag};
use serde::Serialize;

const NO_EVENTS_YESTERDAY: &str = "No events yesterday";
const NO_EVENTS_TODAY: &str = "No events scheduled today";
const NO_EVENTS_TOMORROW: &str = "No events scheduled tomorrow";
const NO_PENDING_TASKS: &str = "No pending tasks";

/// Pretty JSON for a non-empty list, `placeholder` otherwise.
fn render_block<T: Serialize>(items: &[T], placeholder: &str) -> String {
    if items.is_empty() {
        return placeholder.to_string();
    }
    serde_json::to_string_pretty(items).unwrap_or_else(|_| placeholder.to_string())
}

/// The system instruction sent ahead of the conversation turns.
pub fn render_system_prompt(bundle: &ContextBundle) -> String {
    let yesterday = render_block(&bundle.events_on(DayTag::Yesterday), NO_EVENTS_YESTERDAY);
    let today = render_block(&bundle.events_on(DayTag::Today), NO_EVENTS_TODAY);
    let tomorrow = render_block(&bundle.events_on(DayTag::Tomorrow), NO_EVENTS_TOMORROW);
    let tasks = render_block(&bundle.pending_tasks, NO_PENDING_TASKS);
    let zone = bundle.timezone.name();

    format!(
        "You are a helpful AI personal assistant. You have access to the user's current data:

Current Time: {current_time}
Current Date: {current_date}
User Timezone: {zone}

CALENDAR EVENTS:

Yesterday's Events:
{yesterday}

Today's Events:
{today}

Tomorrow's Events:
{tomorrow}

PENDING TASKS:
{tasks}

Unread Emails: {unread}

You can help with:
- Answering questions about their schedule and tasks
- Providing productivity advice
- Helping organize their day
- General conversation

Be helpful, concise, and reference their actual data when relevant. All times shown are in the user's local timezone ({zone}). When they ask about their calendar, include relevant events from yesterday, today, and tomorrow as appropriate.",
        current_time = bundle.current_time(),
        current_date = bundle.current_date(),
        unread = bundle.unread_emails,
    )
}
