use crate::db::schema::*;
use crate::db::{get_conn, DbPool};
use crate::utils::text_utils::TextUtils;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, error, info};

/// Identifiers produced by persisting one user/agent turn pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedExchange {
    pub conversation_id: i64,
    pub user_message_id: i64,
    pub agent_message_id: i64,
}

pub struct ConversationStore {
    pool: DbPool,
}

const CONVERSATION_SELECT: &str = "
    SELECT c.id, c.user_id, c.title, c.created_at, c.updated_at,
           (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id),
           (SELECT MAX(m.created_at) FROM messages m WHERE m.conversation_id = c.id)
    FROM conversations c";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, content, sender, message_type, metadata, created_at";

impl ConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_conversation(row: &Row) -> rusqlite::Result<Conversation> {
        let created_at = time_column(row, 3)?;
        Ok(Conversation {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            created_at,
            updated_at: time_column(row, 4)?,
            message_count: row.get(5)?,
            last_message_time: opt_time_column(row, 6)?.unwrap_or(created_at),
        })
    }

    fn row_to_message(row: &Row) -> rusqlite::Result<ChatMessage> {
        let metadata = match json_column(row, 5)? {
            serde_json::Value::Null => serde_json::json!({}),
            other => other,
        };
        Ok(ChatMessage {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            content: row.get(2)?,
            sender: row.get(3)?,
            message_type: row.get(4)?,
            metadata,
            created_at: time_column(row, 6)?,
        })
    }

    pub fn create_conversation(&self, user_id: i64, title: Option<&str>) -> anyhow::Result<i64> {
        let conn = get_conn(&self.pool)?;
        let now = to_db_time(&Utc::now());
        conn.execute(
            "INSERT INTO conversations (user_id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![user_id, title, now],
        )?;
        let id = conn.last_insert_rowid();
        info!("Created conversation {} for user {}", id, user_id);
        Ok(id)
    }

    /// Conversation by id, only if owned by `user_id`.
    pub fn get_conversation(&self, user_id: i64, conversation_id: i64) -> anyhow::Result<Option<Conversation>> {
        let conn = get_conn(&self.pool)?;
        let conversation = conn
            .query_row(
                &format!("{CONVERSATION_SELECT} WHERE c.id = ?1 AND c.user_id = ?2"),
                params![conversation_id, user_id],
                Self::row_to_conversation,
            )
            .optional()?;
        Ok(conversation)
    }

    /// Most recently updated first.
    pub fn list_conversations(&self, user_id: i64) -> anyhow::Result<Vec<Conversation>> {
        let conn = get_conn(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "{CONVERSATION_SELECT} WHERE c.user_id = ?1 ORDER BY c.updated_at DESC, c.id DESC"
        ))?;
        let conversations = stmt
            .query_map([user_id], Self::row_to_conversation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conversations)
    }

    pub fn append_message(
        &self,
        conversation_id: i64,
        sender: Sender,
        content: &str,
        message_type: &str,
        metadata: &serde_json::Value,
    ) -> anyhow::Result<ChatMessage> {
        let conn = get_conn(&self.pool)?;
        let now = Utc::now();
        let now_str = to_db_time(&now);
        let metadata_json = serde_json::to_string(metadata)?;

        conn.execute(
            "INSERT INTO messages (conversation_id, content, sender, message_type, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![conversation_id, content, sender, message_type, metadata_json, now_str],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![now_str, conversation_id],
        )?;

        debug!("Appended {} message {} to conversation {}", sender, id, conversation_id);
        Ok(ChatMessage {
            id,
            conversation_id,
            content: content.to_string(),
            sender,
            message_type: message_type.to_string(),
            metadata: metadata.clone(),
            created_at: now,
        })
    }

    /// All messages, oldest first.
    pub fn get_messages(&self, conversation_id: i64) -> anyhow::Result<Vec<ChatMessage>> {
        let conn = get_conn(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1
             ORDER BY created_at, id"
        ))?;
        let messages = stmt
            .query_map([conversation_id], Self::row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    /// The `limit` newest messages, returned oldest first.
    pub fn recent_messages(&self, conversation_id: i64, limit: usize) -> anyhow::Result<Vec<ChatMessage>> {
        let conn = get_conn(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))?;
        let mut messages = stmt
            .query_map(params![conversation_id, limit as i64], Self::row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    fn try_save_exchange(
        &self,
        user_id: i64,
        user_message: &str,
        reply: &str,
        conversation_id: Option<i64>,
    ) -> anyhow::Result<SavedExchange> {
        let existing = match conversation_id {
            Some(id) => self.get_conversation(user_id, id)?.map(|c| c.id),
            None => None,
        };
        let conversation_id = match existing {
            Some(id) => id,
            None => {
                let title = TextUtils::conversation_title(user_message);
                self.create_conversation(user_id, Some(&title))?
            }
        };

        let empty = serde_json::json!({});
        let user_msg = self.append_message(conversation_id, Sender::User, user_message, "text", &empty)?;
        let agent_msg = self.append_message(conversation_id, Sender::Agent, reply, "text", &empty)?;

        Ok(SavedExchange {
            conversation_id,
            user_message_id: user_msg.id,
            agent_message_id: agent_msg.id,
        })
    }

    /// Persist a user/agent turn pair. Reuses `conversation_id` when it belongs
    /// to the user, otherwise starts a new conversation. Failures are logged
    /// and reported as `None`.
    pub fn save_exchange(
        &self,
        user_id: i64,
        user_message: &str,
        reply: &str,
        conversation_id: Option<i64>,
    ) -> Option<SavedExchange> {
        match self.try_save_exchange(user_id, user_message, reply, conversation_id) {
            Ok(saved) => Some(saved),
            Err(e) => {
                error!(error = %e, user_id, "Error saving conversation");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::user_store::NewUser;
    use crate::db::Database;

    fn setup() -> (Database, i64, i64) {
        let db = Database::new_in_memory().unwrap();
        let mut ids = Vec::new();
        for name in ["alice", "bob"] {
            let user = db
                .users
                .create_user(NewUser {
                    username: name,
                    password: "pw",
                    email: None,
                    first_name: "",
                    last_name: "",
                    timezone: "UTC",
                })
                .unwrap();
            ids.push(user.id);
        }
        (db, ids[0], ids[1])
    }

    #[test]
    fn save_without_id_creates_new_conversation_each_time() {
        let (db, alice, _) = setup();
        let first = db.conversations.save_exchange(alice, "hello", "hi", None).unwrap();
        let second = db.conversations.save_exchange(alice, "hello", "hi", None).unwrap();
        assert_ne!(first.conversation_id, second.conversation_id);
        assert_eq!(db.conversations.list_conversations(alice).unwrap().len(), 2);
    }

    #[test]
    fn save_with_owned_id_appends_in_order() {
        let (db, alice, _) = setup();
        let first = db.conversations.save_exchange(alice, "one", "reply one", None).unwrap();
        let second = db
            .conversations
            .save_exchange(alice, "two", "reply two", Some(first.conversation_id))
            .unwrap();
        assert_eq!(first.conversation_id, second.conversation_id);

        let messages = db.conversations.get_messages(first.conversation_id).unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "reply one", "two", "reply two"]);
        let senders: Vec<_> = messages.iter().map(|m| m.sender).collect();
        assert_eq!(senders, vec![Sender::User, Sender::Agent, Sender::User, Sender::Agent]);
        assert_eq!(messages[0].metadata, serde_json::json!({}));

        let conversation = db.conversations.get_conversation(alice, first.conversation_id).unwrap().unwrap();
        assert_eq!(conversation.message_count, 4);
        assert_eq!(conversation.title.as_deref(), Some("one"));
    }

    #[test]
    fn foreign_conversation_id_starts_a_new_one() {
        let (db, alice, bob) = setup();
        let bobs = db.conversations.save_exchange(bob, "bob's", "ok", None).unwrap();
        let alices = db
            .conversations
            .save_exchange(alice, "mine", "ok", Some(bobs.conversation_id))
            .unwrap();
        assert_ne!(alices.conversation_id, bobs.conversation_id);
        assert!(db.conversations.get_conversation(alice, bobs.conversation_id).unwrap().is_none());
        assert_eq!(db.conversations.get_messages(bobs.conversation_id).unwrap().len(), 2);
    }

    #[test]
    fn long_first_message_is_truncated_into_title() {
        let (db, alice, _) = setup();
        let long = "x".repeat(80);
        let saved = db.conversations.save_exchange(alice, &long, "ok", None).unwrap();
        let conversation = db.conversations.get_conversation(alice, saved.conversation_id).unwrap().unwrap();
        assert_eq!(conversation.title.unwrap(), format!("{}...", "x".repeat(50)));
    }

    #[test]
    fn recent_messages_returns_newest_window_oldest_first() {
        let (db, alice, _) = setup();
        let id = db.conversations.create_conversation(alice, Some("t")).unwrap();
        let empty = serde_json::json!({});
        for i in 0..14 {
            db.conversations
                .append_message(id, Sender::User, &format!("m{i}"), "text", &empty)
                .unwrap();
        }
        let recent = db.conversations.recent_messages(id, 10).unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.clone()).collect();
        let expected: Vec<_> = (4..14).map(|i| format!("m{i}")).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn save_failure_degrades_to_none() {
        let (db, _, _) = setup();
        // Unknown user violates the conversations.user_id foreign key.
        assert!(db.conversations.save_exchange(424242, "hi", "hello", None).is_none());
    }
}
