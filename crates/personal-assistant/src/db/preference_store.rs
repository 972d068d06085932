use crate::db::schema::*;
use crate::db::{get_conn, DbPool};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

pub const DEFAULT_AI_MODEL: &str = "gpt-3.5-turbo";

#[derive(Debug, Default)]
pub struct PreferenceUpdate {
    pub preferred_ai_model: Option<String>,
    pub notification_settings: Option<serde_json::Value>,
    pub privacy_settings: Option<serde_json::Value>,
    pub custom_commands: Option<serde_json::Value>,
}

pub struct PreferenceStore {
    pool: DbPool,
}

impl PreferenceStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_preference(row: &Row) -> rusqlite::Result<UserPreference> {
        Ok(UserPreference {
            user_id: row.get(0)?,
            preferred_ai_model: row.get(1)?,
            notification_settings: json_column(row, 2)?,
            privacy_settings: json_column(row, 3)?,
            custom_commands: json_column(row, 4)?,
            created_at: time_column(row, 5)?,
            updated_at: time_column(row, 6)?,
        })
    }

    fn fetch(conn: &rusqlite::Connection, user_id: i64) -> rusqlite::Result<Option<UserPreference>> {
        conn.query_row(
            "SELECT user_id, preferred_ai_model, notification_settings, privacy_settings,
                    custom_commands, created_at, updated_at
             FROM user_preferences WHERE user_id = ?1",
            [user_id],
            Self::row_to_preference,
        )
        .optional()
    }

    /// Preferences for the user, inserting defaults on first access.
    pub fn get_or_create(&self, user_id: i64) -> anyhow::Result<UserPreference> {
        let conn = get_conn(&self.pool)?;
        if let Some(pref) = Self::fetch(&conn, user_id)? {
            return Ok(pref);
        }
        let now = to_db_time(&Utc::now());
        conn.execute(
            "INSERT OR IGNORE INTO user_preferences
             (user_id, preferred_ai_model, notification_settings, privacy_settings, custom_commands, created_at, updated_at)
             VALUES (?1, ?2, '{}', '{}', '[]', ?3, ?3)",
            params![user_id, DEFAULT_AI_MODEL, now],
        )?;
        info!("Created default preferences for user {}", user_id);
        Self::fetch(&conn, user_id)?
            .ok_or_else(|| anyhow::anyhow!("Preferences for user {} missing after insert", user_id))
    }

    pub fn update(&self, user_id: i64, update: &PreferenceUpdate) -> anyhow::Result<UserPreference> {
        let current = self.get_or_create(user_id)?;
        let model = update
            .preferred_ai_model
            .clone()
            .unwrap_or(current.preferred_ai_model);
        let notification = update
            .notification_settings
            .clone()
            .unwrap_or(current.notification_settings);
        let privacy = update.privacy_settings.clone().unwrap_or(current.privacy_settings);
        let commands = update.custom_commands.clone().unwrap_or(current.custom_commands);

        let conn = get_conn(&self.pool)?;
        conn.execute(
            "UPDATE user_preferences
             SET preferred_ai_model = ?1, notification_settings = ?2, privacy_settings = ?3,
                 custom_commands = ?4, updated_at = ?5
             WHERE user_id = ?6",
            params![
                model,
                serde_json::to_string(&notification)?,
                serde_json::to_string(&privacy)?,
                serde_json::to_string(&commands)?,
                to_db_time(&Utc::now()),
                user_id,
            ],
        )?;
        Self::fetch(&conn, user_id)?
            .ok_or_else(|| anyhow::anyhow!("Preferences for user {} disappeared", user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::user_store::NewUser;
    use crate::db::Database;

    #[test]
    fn defaults_then_partial_update() {
        let db = Database::new_in_memory().unwrap();
        let user = db
            .users
            .create_user(NewUser {
                username: "p",
                password: "pw",
                email: None,
                first_name: "",
                last_name: "",
                timezone: "UTC",
            })
            .unwrap();

        let pref = db.preferences.get_or_create(user.id).unwrap();
        assert_eq!(pref.preferred_ai_model, DEFAULT_AI_MODEL);
        assert_eq!(pref.custom_commands, serde_json::json!([]));

        let updated = db
            .preferences
            .update(
                user.id,
                &PreferenceUpdate {
                    privacy_settings: Some(serde_json::json!({"share_calendar": false})),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.preferred_ai_model, DEFAULT_AI_MODEL);
        assert_eq!(updated.privacy_settings["share_calendar"], false);
    }
}
