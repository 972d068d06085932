//! SQLite-backed persistence for users, conversations, calendar, tasks and email.
pub mod schema;
pub mod migration;
pub mod user_store;
pub mod conversation_store;
pub mod command_store;
pub mod preference_store;
pub mod calendar_store;
pub mod task_store;
pub mod email_store;

pub use schema::*;
pub use migration::MigrationManager;
pub use user_store::UserStore;
pub use conversation_store::ConversationStore;
pub use command_store::CommandStore;
pub use preference_store::PreferenceStore;
pub use calendar_store::{CalendarStore, EventFilter, EventUpdate, NewEvent};
pub use task_store::{NewTask, TaskFilter, TaskStats, TaskStore, TaskUpdate};
pub use email_store::{EmailFilter, EmailStore, EmailUpdate, NewEmail, NewEmailAccount};

use std::path::Path;
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

pub(crate) type DbPool = Arc<Pool<SqliteConnectionManager>>;
pub(crate) type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

pub(crate) fn get_conn(pool: &DbPool) -> anyhow::Result<PooledConn> {
    pool.get()
        .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
}

/// True when the error is a UNIQUE/PRIMARY KEY violation.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

pub struct Database {
    pub users: UserStore,
    pub conversations: ConversationStore,
    pub commands: CommandStore,
    pub preferences: PreferenceStore,
    pub calendar: CalendarStore,
    pub tasks: TaskStore,
    pub emails: EmailStore,
    pool: DbPool,
}

impl Database {
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening assistant database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = 5000;",
                )
            });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        info!("Assistant database initialized successfully");
        Ok(Self::from_pool(Arc::new(pool)))
    }

    /// Single-connection in-memory database; every store shares that one connection.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self::from_pool(Arc::new(pool)))
    }

    fn from_pool(pool: DbPool) -> Self {
        Self {
            users: UserStore::new(Arc::clone(&pool)),
            conversations: ConversationStore::new(Arc::clone(&pool)),
            commands: CommandStore::new(Arc::clone(&pool)),
            preferences: PreferenceStore::new(Arc::clone(&pool)),
            calendar: CalendarStore::new(Arc::clone(&pool)),
            tasks: TaskStore::new(Arc::clone(&pool)),
            emails: EmailStore::new(Arc::clone(&pool)),
            pool,
        }
    }

    pub fn get_stats(&self) -> anyhow::Result<DatabaseStats> {
        let conn = get_conn(&self.pool)?;
        Ok(migration::get_database_stats(&conn)?)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_database_enforces_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("nested").join("assistant.db")).unwrap();

        let conn = get_conn(&db.pool).unwrap();
        let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
        assert_eq!(fk, 1);
        drop(conn);

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.total_conversations, 0);
    }
}
