//! Accounts, profiles and API tokens.
use crate::db::schema::*;
use crate::db::{get_conn, DbPool};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use rand::RngCore;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

pub struct NewUser<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub email: Option<&'a str>,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub timezone: &'a str,
}

#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub timezone: Option<String>,
}

pub struct UserStore {
    pool: DbPool,
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Argon2id digest in PHC string form; the salt travels inside it.
fn encode_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, encoded: &str) -> bool {
    match PasswordHash::new(encoded) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

const USER_COLUMNS: &str =
    "id, username, email, first_name, last_name, password_hash, date_joined, last_login";

impl UserStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            first_name: row.get(3)?,
            last_name: row.get(4)?,
            password_hash: row.get(5)?,
            date_joined: time_column(row, 6)?,
            last_login: opt_time_column(row, 7)?,
        })
    }

    /// Create a user and its profile in one transaction.
    pub fn create_user(&self, new_user: NewUser<'_>) -> anyhow::Result<User> {
        let mut conn = get_conn(&self.pool)?;
        let now = Utc::now();
        let now_str = to_db_time(&now);
        let password_hash = encode_password(new_user.password)?;

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO users (username, email, first_name, last_name, password_hash, date_joined)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new_user.username,
                new_user.email,
                new_user.first_name,
                new_user.last_name,
                password_hash,
                now_str,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO user_profiles (user_id, timezone, created_at) VALUES (?1, ?2, ?3)",
            params![id, new_user.timezone, now_str],
        )?;
        tx.commit()?;

        info!("Created user {} ({})", new_user.username, id);
        Ok(User {
            id,
            username: new_user.username.to_string(),
            email: new_user.email.map(str::to_string),
            first_name: new_user.first_name.to_string(),
            last_name: new_user.last_name.to_string(),
            password_hash,
            date_joined: now,
            last_login: None,
        })
    }

    pub fn get_user(&self, user_id: i64) -> anyhow::Result<Option<User>> {
        let conn = get_conn(&self.pool)?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [user_id],
                Self::row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Check credentials; on success stamps `last_login`.
    pub fn authenticate(&self, username: &str, password: &str) -> anyhow::Result<Option<User>> {
        let conn = get_conn(&self.pool)?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                [username],
                Self::row_to_user,
            )
            .optional()?;

        match user {
            Some(mut user) if verify_password(password, &user.password_hash) => {
                let now = Utc::now();
                conn.execute(
                    "UPDATE users SET last_login = ?1 WHERE id = ?2",
                    params![to_db_time(&now), user.id],
                )?;
                user.last_login = Some(now);
                Ok(Some(user))
            }
            _ => Ok(None),
        }
    }

    /// Return the caller's existing token or mint a new one.
    pub fn get_or_create_token(&self, user_id: i64) -> anyhow::Result<String> {
        let conn = get_conn(&self.pool)?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT token FROM auth_tokens WHERE user_id = ?1 ORDER BY created_at LIMIT 1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(token) = existing {
            return Ok(token);
        }

        let token = random_hex(20);
        conn.execute(
            "INSERT INTO auth_tokens (token, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![token, user_id, to_db_time(&Utc::now())],
        )?;
        debug!("Issued token for user {}", user_id);
        Ok(token)
    }

    pub fn user_for_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        let conn = get_conn(&self.pool)?;
        let user = conn
            .query_row(
                "SELECT u.id, u.username, u.email, u.first_name, u.last_name, u.password_hash,
                        u.date_joined, u.last_login
                 FROM auth_tokens t JOIN users u ON u.id = t.user_id
                 WHERE t.token = ?1",
                [token],
                Self::row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn revoke_tokens(&self, user_id: i64) -> anyhow::Result<usize> {
        let conn = get_conn(&self.pool)?;
        let deleted = conn.execute("DELETE FROM auth_tokens WHERE user_id = ?1", [user_id])?;
        info!("Revoked {} token(s) for user {}", deleted, user_id);
        Ok(deleted)
    }

    /// Stored zone name, if the user has a profile.
    pub fn get_timezone(&self, user_id: i64) -> anyhow::Result<Option<String>> {
        let conn = get_conn(&self.pool)?;
        let tz = conn
            .query_row(
                "SELECT timezone FROM user_profiles WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(tz)
    }

    pub fn update_profile(&self, user_id: i64, update: &ProfileUpdate) -> anyhow::Result<()> {
        let mut conn = get_conn(&self.pool)?;
        let tx = conn.transaction()?;
        if let Some(ref email) = update.email {
            tx.execute("UPDATE users SET email = ?1 WHERE id = ?2", params![email, user_id])?;
        }
        if let Some(ref first_name) = update.first_name {
            tx.execute(
                "UPDATE users SET first_name = ?1 WHERE id = ?2",
                params![first_name, user_id],
            )?;
        }
        if let Some(ref last_name) = update.last_name {
            tx.execute(
                "UPDATE users SET last_name = ?1 WHERE id = ?2",
                params![last_name, user_id],
            )?;
        }
        if let Some(ref timezone) = update.timezone {
            tx.execute(
                "INSERT INTO user_profiles (user_id, timezone, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET timezone = excluded.timezone",
                params![user_id, timezone, to_db_time(&Utc::now())],
            )?;
        }
        tx.commit()?;
        info!("Updated profile for user {}", user_id);
        Ok(())
    }

    pub fn delete_user(&self, user_id: i64) -> anyhow::Result<usize> {
        let conn = get_conn(&self.pool)?;
        let deleted = conn.execute("DELETE FROM users WHERE id = ?1", [user_id])?;
        info!("Deleted user {}", user_id);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{is_unique_violation, Database};

    fn new_user<'a>(username: &'a str) -> NewUser<'a> {
        NewUser {
            username,
            password: "s3cret",
            email: Some("a@example.com"),
            first_name: "Ada",
            last_name: "Lovelace",
            timezone: "Europe/London",
        }
    }

    #[test]
    fn password_encoding_is_salted() {
        let a = encode_password("pw").unwrap();
        let b = encode_password("pw").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));
        assert!(verify_password("pw", &a));
        assert!(!verify_password("wrong", &a));
        assert!(!verify_password("pw", "garbage"));
    }

    #[test]
    fn authenticate_and_tokens() {
        let db = Database::new_in_memory().unwrap();
        let user = db.users.create_user(new_user("ada")).unwrap();

        assert!(db.users.authenticate("ada", "nope").unwrap().is_none());
        assert!(db.users.authenticate("nobody", "s3cret").unwrap().is_none());
        let logged_in = db.users.authenticate("ada", "s3cret").unwrap().unwrap();
        assert!(logged_in.last_login.is_some());

        let token = db.users.get_or_create_token(user.id).unwrap();
        assert_eq!(token.len(), 40);
        assert_eq!(db.users.get_or_create_token(user.id).unwrap(), token);
        assert_eq!(db.users.user_for_token(&token).unwrap().unwrap().id, user.id);

        assert_eq!(db.users.revoke_tokens(user.id).unwrap(), 1);
        assert!(db.users.user_for_token(&token).unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_unique_violation() {
        let db = Database::new_in_memory().unwrap();
        db.users.create_user(new_user("ada")).unwrap();
        let err = db.users.create_user(new_user("ada")).unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn profile_timezone_updates() {
        let db = Database::new_in_memory().unwrap();
        let user = db.users.create_user(new_user("ada")).unwrap();
        assert_eq!(db.users.get_timezone(user.id).unwrap().as_deref(), Some("Europe/London"));

        db.users
            .update_profile(
                user.id,
                &ProfileUpdate { timezone: Some("Asia/Tokyo".into()), ..Default::default() },
            )
            .unwrap();
        assert_eq!(db.users.get_timezone(user.id).unwrap().as_deref(), Some("Asia/Tokyo"));
        assert_eq!(db.users.get_timezone(9999).unwrap(), None);
    }
}
