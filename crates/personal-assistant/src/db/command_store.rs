//! Audit records for AI-handled requests.
use crate::db::schema::*;
use crate::db::{get_conn, DbPool};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

pub struct NewCommand<'a> {
    pub user_id: i64,
    pub message_id: i64,
    pub command_type: CommandType,
    pub original_text: &'a str,
    pub parsed_intent: serde_json::Value,
}

pub struct CommandStore {
    pool: DbPool,
}

const COMMAND_COLUMNS: &str = "id, user_id, message_id, command_type, original_text, parsed_intent,
     status, result, error_message, processing_time, created_at, completed_at";

impl CommandStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_command(row: &Row) -> rusqlite::Result<AiCommand> {
        Ok(AiCommand {
            id: row.get(0)?,
            user_id: row.get(1)?,
            message_id: row.get(2)?,
            command_type: row.get(3)?,
            original_text: row.get(4)?,
            parsed_intent: json_column(row, 5)?,
            status: row.get(6)?,
            result: json_column(row, 7)?,
            error_message: row.get(8)?,
            processing_time: row.get(9)?,
            created_at: time_column(row, 10)?,
            completed_at: opt_time_column(row, 11)?,
        })
    }

    /// Insert a command in `pending` state.
    pub fn record(&self, command: NewCommand<'_>) -> anyhow::Result<i64> {
        let conn = get_conn(&self.pool)?;
        conn.execute(
            "INSERT INTO ai_commands (user_id, message_id, command_type, original_text, parsed_intent, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                command.user_id,
                command.message_id,
                command.command_type,
                command.original_text,
                serde_json::to_string(&command.parsed_intent)?,
                CommandStatus::Pending,
                to_db_time(&Utc::now()),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Recorded {} command {} for user {}", command.command_type, id, command.user_id);
        Ok(id)
    }

    /// Move a command to a terminal state.
    pub fn finish(
        &self,
        command_id: i64,
        status: CommandStatus,
        result: &serde_json::Value,
        error_message: Option<&str>,
        processing_time: f64,
    ) -> anyhow::Result<()> {
        let conn = get_conn(&self.pool)?;
        conn.execute(
            "UPDATE ai_commands
             SET status = ?1, result = ?2, error_message = ?3, processing_time = ?4, completed_at = ?5
             WHERE id = ?6",
            params![
                status,
                serde_json::to_string(result)?,
                error_message,
                processing_time,
                to_db_time(&Utc::now()),
                command_id,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, user_id: i64, command_id: i64) -> anyhow::Result<Option<AiCommand>> {
        let conn = get_conn(&self.pool)?;
        let command = conn
            .query_row(
                &format!("SELECT {COMMAND_COLUMNS} FROM ai_commands WHERE id = ?1 AND user_id = ?2"),
                params![command_id, user_id],
                Self::row_to_command,
            )
            .optional()?;
        Ok(command)
    }

    /// Newest first.
    pub fn list(&self, user_id: i64) -> anyhow::Result<Vec<AiCommand>> {
        let conn = get_conn(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMMAND_COLUMNS} FROM ai_commands WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
        ))?;
        let commands = stmt
            .query_map([user_id], Self::row_to_command)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::user_store::NewUser;
    use crate::db::Database;

    #[test]
    fn record_and_finish_command() {
        let db = Database::new_in_memory().unwrap();
        let user = db
            .users
            .create_user(NewUser {
                username: "u",
                password: "pw",
                email: None,
                first_name: "",
                last_name: "",
                timezone: "UTC",
            })
            .unwrap();
        let saved = db.conversations.save_exchange(user.id, "what's up", "not much", None).unwrap();

        let id = db
            .commands
            .record(NewCommand {
                user_id: user.id,
                message_id: saved.user_message_id,
                command_type: CommandType::General,
                original_text: "what's up",
                parsed_intent: serde_json::json!({}),
            })
            .unwrap();
        assert_eq!(db.commands.get(user.id, id).unwrap().unwrap().status, CommandStatus::Pending);

        db.commands
            .finish(id, CommandStatus::Completed, &serde_json::json!({"tokens_used": 12}), None, 0.25)
            .unwrap();
        let command = db.commands.get(user.id, id).unwrap().unwrap();
        assert_eq!(command.status, CommandStatus::Completed);
        assert_eq!(command.result["tokens_used"], 12);
        assert!(command.completed_at.is_some());
        assert_eq!(db.commands.list(user.id).unwrap().len(), 1);
        assert!(db.commands.get(user.id + 1, id).unwrap().is_none());
    }
}
