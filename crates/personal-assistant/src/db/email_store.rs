//! Mirror of external mailboxes: accounts, messages and labels.
use crate::db::schema::*;
use crate::db::{get_conn, DbPool};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info};

pub struct NewEmailAccount {
    pub email_address: String,
    pub provider: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewEmail {
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
    pub received_at: Option<DateTime<Utc>>,
    /// `(name, gmail_label_id)` pairs.
    pub labels: Vec<(String, Option<String>)>,
}

/// Only the flags a client may change on a mirrored message.
#[derive(Debug, Clone, Default)]
pub struct EmailUpdate {
    pub is_read: Option<bool>,
    pub is_important: Option<bool>,
    pub is_starred: Option<bool>,
    pub priority: Option<EmailPriority>,
}

#[derive(Debug, Clone, Default)]
pub struct EmailFilter {
    pub is_read: Option<bool>,
    pub account_id: Option<i64>,
}

pub struct EmailStore {
    pool: DbPool,
}

const ACCOUNT_COLUMNS: &str =
    "id, user_id, email_address, provider, access_token, refresh_token, is_active, last_sync, created_at";

const EMAIL_SELECT: &str = "
    SELECT e.id, e.account_id, a.email_address, e.gmail_message_id, e.thread_id, e.subject,
           e.sender_email, e.sender_name, e.recipient_emails, e.body_text, e.body_html, e.snippet,
           e.is_read, e.is_important, e.is_starred, e.priority, e.received_at, e.created_at,
           e.updated_at
    FROM emails e JOIN email_accounts a ON a.id = e.account_id";

impl EmailStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_account(row: &Row) -> rusqlite::Result<EmailAccount> {
        Ok(EmailAccount {
            id: row.get(0)?,
            user_id: row.get(1)?,
            email_address: row.get(2)?,
            provider: row.get(3)?,
            access_token: row.get(4)?,
            refresh_token: row.get(5)?,
            is_active: row.get(6)?,
            last_sync: opt_time_column(row, 7)?,
            created_at: time_column(row, 8)?,
        })
    }

    fn row_to_email(row: &Row) -> rusqlite::Result<Email> {
        let recipients = match json_column(row, 8)? {
            serde_json::Value::Array(items) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        Ok(Email {
            id: row.get(0)?,
            account_id: row.get(1)?,
            account_email: row.get(2)?,
            gmail_message_id: row.get(3)?,
            thread_id: row.get(4)?,
            subject: row.get(5)?,
            sender_email: row.get(6)?,
            sender_name: row.get(7)?,
            recipient_emails: recipients,
            body_text: row.get(9)?,
            body_html: row.get(10)?,
            snippet: row.get(11)?,
            is_read: row.get(12)?,
            is_important: row.get(13)?,
            is_starred: row.get(14)?,
            priority: row.get(15)?,
            received_at: time_column(row, 16)?,
            created_at: time_column(row, 17)?,
            updated_at: time_column(row, 18)?,
            labels: Vec::new(),
        })
    }

    fn load_labels(conn: &Connection, email: &mut Email) -> rusqlite::Result<()> {
        let mut stmt = conn.prepare_cached(
            "SELECT id, email_id, name, gmail_label_id FROM email_labels WHERE email_id = ?1 ORDER BY name",
        )?;
        email.labels = stmt
            .query_map([email.id], |row| {
                Ok(EmailLabel {
                    id: row.get(0)?,
                    email_id: row.get(1)?,
                    name: row.get(2)?,
                    gmail_label_id: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(())
    }

    pub fn create_account(&self, user_id: i64, account: &NewEmailAccount) -> anyhow::Result<EmailAccount> {
        let conn = get_conn(&self.pool)?;
        conn.execute(
            "INSERT INTO email_accounts (user_id, email_address, provider, access_token, refresh_token, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                account.email_address,
                account.provider,
                account.access_token,
                account.refresh_token,
                to_db_time(&Utc::now()),
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!("Linked email account {} for user {}", account.email_address, user_id);
        conn.query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM email_accounts WHERE id = ?1"),
            [id],
            Self::row_to_account,
        )
        .map_err(Into::into)
    }

    pub fn get_account(&self, user_id: i64, account_id: i64) -> anyhow::Result<Option<EmailAccount>> {
        let conn = get_conn(&self.pool)?;
        let account = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM email_accounts WHERE id = ?1 AND user_id = ?2"),
                params![account_id, user_id],
                Self::row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    pub fn list_accounts(&self, user_id: i64) -> anyhow::Result<Vec<EmailAccount>> {
        let conn = get_conn(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM email_accounts WHERE user_id = ?1 ORDER BY created_at, id"
        ))?;
        let accounts = stmt
            .query_map([user_id], Self::row_to_account)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    /// Store a mirrored message and its labels. The account must already be
    /// verified as the caller's.
    pub fn ingest_email(&self, account_id: i64, email: &NewEmail) -> anyhow::Result<Email> {
        let mut conn = get_conn(&self.pool)?;
        let now = to_db_time(&Utc::now());
        let received_at = email.received_at.map(|t| to_db_time(&t)).unwrap_or_else(|| now.clone());

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO emails
             (account_id, gmail_message_id, thread_id, subject, sender_email, sender_name,
              recipient_emails, body_text, body_html, snippet, is_read, is_important, is_starred,
              priority, received_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)",
            params![
                account_id,
                email.gmail_message_id,
                email.thread_id,
                email.subject,
                email.sender_email,
                email.sender_name,
                serde_json::to_string(&email.recipient_emails)?,
                email.body_text,
                email.body_html,
                email.snippet,
                email.is_read,
                email.is_important,
                email.is_starred,
                email.priority,
                received_at,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();
        for (name, gmail_label_id) in &email.labels {
            tx.execute(
                "INSERT OR IGNORE INTO email_labels (email_id, name, gmail_label_id) VALUES (?1, ?2, ?3)",
                params![id, name, gmail_label_id],
            )?;
        }
        tx.execute(
            "UPDATE email_accounts SET last_sync = ?1 WHERE id = ?2",
            params![now, account_id],
        )?;
        tx.commit()?;
        debug!("Ingested email {} into account {}", email.gmail_message_id, account_id);

        let mut stored = conn.query_row(&format!("{EMAIL_SELECT} WHERE e.id = ?1"), [id], Self::row_to_email)?;
        Self::load_labels(&conn, &mut stored)?;
        Ok(stored)
    }

    pub fn get_email(&self, user_id: i64, email_id: i64) -> anyhow::Result<Option<Email>> {
        let conn = get_conn(&self.pool)?;
        let email = conn
            .query_row(
                &format!("{EMAIL_SELECT} WHERE e.id = ?1 AND a.user_id = ?2"),
                params![email_id, user_id],
                Self::row_to_email,
            )
            .optional()?;
        match email {
            Some(mut email) => {
                Self::load_labels(&conn, &mut email)?;
                Ok(Some(email))
            }
            None => Ok(None),
        }
    }

    /// Newest first.
    pub fn list_emails(&self, user_id: i64, filter: &EmailFilter) -> anyhow::Result<Vec<Email>> {
        let conn = get_conn(&self.pool)?;
        let mut sql = format!("{EMAIL_SELECT} WHERE a.user_id = ?1");
        let mut args: Vec<Value> = vec![Value::Integer(user_id)];
        if let Some(is_read) = filter.is_read {
            args.push(Value::Integer(is_read as i64));
            sql.push_str(&format!(" AND e.is_read = ?{}", args.len()));
        }
        if let Some(account_id) = filter.account_id {
            args.push(Value::Integer(account_id));
            sql.push_str(&format!(" AND e.account_id = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY e.received_at DESC, e.id DESC");

        let mut stmt = conn.prepare(&sql)?;
        let mut emails = stmt
            .query_map(params_from_iter(args), Self::row_to_email)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for email in &mut emails {
            Self::load_labels(&conn, email)?;
        }
        Ok(emails)
    }

    pub fn update_email(&self, user_id: i64, email_id: i64, update: &EmailUpdate) -> anyhow::Result<Option<Email>> {
        let Some(mut email) = self.get_email(user_id, email_id)? else {
            return Ok(None);
        };
        if let Some(is_read) = update.is_read {
            email.is_read = is_read;
        }
        if let Some(is_important) = update.is_important {
            email.is_important = is_important;
        }
        if let Some(is_starred) = update.is_starred {
            email.is_starred = is_starred;
        }
        if let Some(priority) = update.priority {
            email.priority = priority;
        }
        email.updated_at = Utc::now();

        let conn = get_conn(&self.pool)?;
        conn.execute(
            "UPDATE emails SET is_read = ?1, is_important = ?2, is_starred = ?3, priority = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                email.is_read,
                email.is_important,
                email.is_starred,
                email.priority,
                to_db_time(&email.updated_at),
                email_id,
            ],
        )?;
        Ok(Some(email))
    }

    /// Unread messages across every account the user owns.
    pub fn unread_count(&self, user_id: i64) -> anyhow::Result<i64> {
        let conn = get_conn(&self.pool)?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM emails e JOIN email_accounts a ON a.id = e.account_id
             WHERE a.user_id = ?1 AND e.is_read = 0",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::user_store::NewUser;
    use crate::db::{is_unique_violation, Database};
    use chrono::{Duration, TimeZone};

    fn setup() -> (Database, i64, i64) {
        let db = Database::new_in_memory().unwrap();
        let user = db
            .users
            .create_user(NewUser {
                username: "mail",
                password: "pw",
                email: None,
                first_name: "",
                last_name: "",
                timezone: "UTC",
            })
            .unwrap();
        let account = db
            .emails
            .create_account(
                user.id,
                &NewEmailAccount {
                    email_address: "me@example.com".into(),
                    provider: "gmail".into(),
                    access_token: Some("secret".into()),
                    refresh_token: None,
                },
            )
            .unwrap();
        (db, user.id, account.id)
    }

    fn message(id: &str, is_read: bool, received_at: DateTime<Utc>) -> NewEmail {
        NewEmail {
            gmail_message_id: id.to_string(),
            subject: format!("Subject {id}"),
            sender_email: "boss@example.com".into(),
            recipient_emails: vec!["me@example.com".into()],
            is_read,
            received_at: Some(received_at),
            ..Default::default()
        }
    }

    #[test]
    fn ingest_with_labels_and_duplicate_rejection() {
        let (db, user, account) = setup();
        let mut msg = message("m1", false, Utc::now());
        msg.labels = vec![("INBOX".into(), Some("INBOX".into())), ("Work".into(), None)];
        let stored = db.emails.ingest_email(account, &msg).unwrap();
        assert_eq!(stored.account_email, "me@example.com");
        assert_eq!(stored.labels.len(), 2);
        assert_eq!(stored.recipient_emails, vec!["me@example.com".to_string()]);
        assert_eq!(stored.sender_display(), "boss@example.com");

        let err = db.emails.ingest_email(account, &msg).unwrap_err();
        assert!(is_unique_violation(&err));

        let account = db.emails.get_account(user, account).unwrap().unwrap();
        assert!(account.last_sync.is_some());
    }

    #[test]
    fn unread_count_and_mark_read() {
        let (db, user, account) = setup();
        let now = Utc::now();
        let first = db.emails.ingest_email(account, &message("a", false, now)).unwrap();
        db.emails.ingest_email(account, &message("b", false, now)).unwrap();
        db.emails.ingest_email(account, &message("c", true, now)).unwrap();
        assert_eq!(db.emails.unread_count(user).unwrap(), 2);

        let updated = db
            .emails
            .update_email(user, first.id, &EmailUpdate { is_read: Some(true), ..Default::default() })
            .unwrap()
            .unwrap();
        assert!(updated.is_read);
        assert_eq!(db.emails.unread_count(user).unwrap(), 1);
        assert_eq!(db.emails.unread_count(user + 1).unwrap(), 0);
        assert!(db.emails.update_email(user + 1, first.id, &EmailUpdate::default()).unwrap().is_none());
    }

    #[test]
    fn list_is_newest_first_and_filterable() {
        let (db, user, account) = setup();
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        db.emails.ingest_email(account, &message("old", true, base)).unwrap();
        db.emails.ingest_email(account, &message("new", false, base + Duration::hours(2))).unwrap();

        let all = db.emails.list_emails(user, &EmailFilter::default()).unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.gmail_message_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        let unread = db
            .emails
            .list_emails(user, &EmailFilter { is_read: Some(false), ..Default::default() })
            .unwrap();
        assert_eq!(unread.len(), 1);
        assert!(!unread[0].is_recent(base + Duration::days(8)));
    }
}
