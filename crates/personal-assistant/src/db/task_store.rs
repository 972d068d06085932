//! Tasks and their categories.
use crate::db::schema::*;
use crate::db::{get_conn, DbPool};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub category_id: Option<i64>,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
}

/// Partial update; nested `Option`s distinguish "clear" from "leave alone".
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub category_id: Option<Option<i64>>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub estimated_hours: Option<Option<f64>>,
    pub actual_hours: Option<Option<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskStats {
    pub total: i64,
    pub completed: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub overdue: i64,
    pub high_priority: i64,
    pub completion_rate: f64,
}

pub struct TaskStore {
    pool: DbPool,
}

const TASK_SELECT: &str = "
    SELECT t.id, t.user_id, t.title, t.description, t.priority, t.status, t.category_id,
           c.name, t.due_date, t.completed_at, t.estimated_hours, t.actual_hours,
           t.created_at, t.updated_at
    FROM tasks t LEFT JOIN task_categories c ON c.id = t.category_id";

/// Priority descending, due date ascending with undated last, then creation order.
const TASK_ORDER: &str = "
    ORDER BY CASE t.priority WHEN 'high' THEN 3 WHEN 'medium' THEN 2 ELSE 1 END DESC,
             t.due_date IS NULL, t.due_date, t.created_at, t.id";

impl TaskStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
        Ok(Task {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            priority: row.get(4)?,
            status: row.get(5)?,
            category_id: row.get(6)?,
            category_name: row.get(7)?,
            due_date: opt_time_column(row, 8)?,
            completed_at: opt_time_column(row, 9)?,
            estimated_hours: row.get(10)?,
            actual_hours: row.get(11)?,
            created_at: time_column(row, 12)?,
            updated_at: time_column(row, 13)?,
        })
    }

    fn row_to_category(row: &Row) -> rusqlite::Result<TaskCategory> {
        Ok(TaskCategory {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            color: row.get(3)?,
        })
    }

    fn category_owned(conn: &rusqlite::Connection, user_id: i64, category_id: i64) -> anyhow::Result<()> {
        let owned: Option<i64> = conn
            .query_row(
                "SELECT id FROM task_categories WHERE id = ?1 AND user_id = ?2",
                params![category_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        match owned {
            Some(_) => Ok(()),
            None => anyhow::bail!("Category {} not found", category_id),
        }
    }

    pub fn create_task(&self, user_id: i64, task: &NewTask) -> anyhow::Result<Task> {
        let conn = get_conn(&self.pool)?;
        if let Some(category_id) = task.category_id {
            Self::category_owned(&conn, user_id, category_id)?;
        }
        let now = Utc::now();
        let completed_at = (task.status == TaskStatus::Completed).then(|| to_db_time(&now));
        conn.execute(
            "INSERT INTO tasks
             (user_id, title, description, priority, status, category_id, due_date, completed_at,
              estimated_hours, actual_hours, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                user_id,
                task.title,
                task.description,
                task.priority,
                task.status,
                task.category_id,
                task.due_date.as_ref().map(to_db_time),
                completed_at,
                task.estimated_hours,
                task.actual_hours,
                to_db_time(&now),
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!("Created task {} for user {}", id, user_id);

        conn.query_row(&format!("{TASK_SELECT} WHERE t.id = ?1"), [id], Self::row_to_task)
            .map_err(Into::into)
    }

    pub fn get_task(&self, user_id: i64, task_id: i64) -> anyhow::Result<Option<Task>> {
        let conn = get_conn(&self.pool)?;
        let task = conn
            .query_row(
                &format!("{TASK_SELECT} WHERE t.id = ?1 AND t.user_id = ?2"),
                params![task_id, user_id],
                Self::row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    pub fn list_tasks(&self, user_id: i64, filter: &TaskFilter) -> anyhow::Result<Vec<Task>> {
        let conn = get_conn(&self.pool)?;
        let mut sql = format!("{TASK_SELECT} WHERE t.user_id = ?1");
        let mut args: Vec<Value> = vec![Value::Integer(user_id)];
        if let Some(status) = filter.status {
            args.push(Value::Text(status.as_str().to_string()));
            sql.push_str(&format!(" AND t.status = ?{}", args.len()));
        }
        if let Some(priority) = filter.priority {
            args.push(Value::Text(priority.as_str().to_string()));
            sql.push_str(&format!(" AND t.priority = ?{}", args.len()));
        }
        if let Some(category_id) = filter.category_id {
            args.push(Value::Integer(category_id));
            sql.push_str(&format!(" AND t.category_id = ?{}", args.len()));
        }
        sql.push_str(TASK_ORDER);

        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(params_from_iter(args), Self::row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Up to `limit` pending tasks in priority order.
    pub fn pending_tasks(&self, user_id: i64, limit: Option<usize>) -> anyhow::Result<Vec<Task>> {
        let conn = get_conn(&self.pool)?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = conn.prepare(&format!(
            "{TASK_SELECT} WHERE t.user_id = ?1 AND t.status = 'pending' {TASK_ORDER} LIMIT ?2"
        ))?;
        let tasks = stmt
            .query_map(params![user_id, limit], Self::row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!("Loaded {} pending tasks for user {}", tasks.len(), user_id);
        Ok(tasks)
    }

    pub fn update_task(&self, user_id: i64, task_id: i64, update: &TaskUpdate) -> anyhow::Result<Option<Task>> {
        let Some(mut task) = self.get_task(user_id, task_id)? else {
            return Ok(None);
        };
        let now = Utc::now();

        if let Some(ref title) = update.title {
            task.title = title.clone();
        }
        if let Some(ref description) = update.description {
            task.description = description.clone();
        }
        if let Some(priority) = update.priority {
            task.priority = priority;
        }
        if let Some(status) = update.status {
            if status == TaskStatus::Completed && task.status != TaskStatus::Completed {
                task.completed_at = Some(now);
            } else if status != TaskStatus::Completed {
                task.completed_at = None;
            }
            task.status = status;
        }
        if let Some(category_id) = update.category_id {
            task.category_id = category_id;
        }
        if let Some(due_date) = update.due_date {
            task.due_date = due_date;
        }
        if let Some(hours) = update.estimated_hours {
            task.estimated_hours = hours;
        }
        if let Some(hours) = update.actual_hours {
            task.actual_hours = hours;
        }

        let conn = get_conn(&self.pool)?;
        if let Some(category_id) = task.category_id {
            Self::category_owned(&conn, user_id, category_id)?;
        }
        conn.execute(
            "UPDATE tasks
             SET title = ?1, description = ?2, priority = ?3, status = ?4, category_id = ?5,
                 due_date = ?6, completed_at = ?7, estimated_hours = ?8, actual_hours = ?9,
                 updated_at = ?10
             WHERE id = ?11 AND user_id = ?12",
            params![
                task.title,
                task.description,
                task.priority,
                task.status,
                task.category_id,
                task.due_date.as_ref().map(to_db_time),
                task.completed_at.as_ref().map(to_db_time),
                task.estimated_hours,
                task.actual_hours,
                to_db_time(&now),
                task_id,
                user_id,
            ],
        )?;
        debug!("Updated task {}", task_id);

        let task = conn
            .query_row(&format!("{TASK_SELECT} WHERE t.id = ?1"), [task_id], Self::row_to_task)
            .optional()?;
        Ok(task)
    }

    /// Mark a task completed at `now`.
    pub fn complete_task(&self, user_id: i64, task_id: i64) -> anyhow::Result<Option<Task>> {
        let conn = get_conn(&self.pool)?;
        let now = to_db_time(&Utc::now());
        let updated = conn.execute(
            "UPDATE tasks SET status = 'completed', completed_at = ?1, updated_at = ?1
             WHERE id = ?2 AND user_id = ?3",
            params![now, task_id, user_id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        info!("Completed task {} for user {}", task_id, user_id);
        let task = conn
            .query_row(&format!("{TASK_SELECT} WHERE t.id = ?1"), [task_id], Self::row_to_task)
            .optional()?;
        Ok(task)
    }

    pub fn delete_task(&self, user_id: i64, task_id: i64) -> anyhow::Result<bool> {
        let conn = get_conn(&self.pool)?;
        let deleted = conn.execute(
            "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
            params![task_id, user_id],
        )?;
        Ok(deleted > 0)
    }

    /// Counts evaluated at `now`.
    pub fn stats(&self, user_id: i64, now: DateTime<Utc>) -> anyhow::Result<TaskStats> {
        let conn = get_conn(&self.pool)?;
        let (total, completed, pending, in_progress, overdue, high_priority): (i64, i64, i64, i64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(status = 'completed'), 0),
                        COALESCE(SUM(status = 'pending'), 0),
                        COALESCE(SUM(status = 'in_progress'), 0),
                        COALESCE(SUM(due_date IS NOT NULL AND due_date < ?2 AND status != 'completed'), 0),
                        COALESCE(SUM(priority = 'high' AND status = 'pending'), 0)
                 FROM tasks WHERE user_id = ?1",
                params![user_id, to_db_time(&now)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
            )?;
        let completion_rate = if total > 0 {
            (completed as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        Ok(TaskStats {
            total,
            completed,
            pending,
            in_progress,
            overdue,
            high_priority,
            completion_rate,
        })
    }

    pub fn create_category(&self, user_id: i64, name: &str, color: &str) -> anyhow::Result<TaskCategory> {
        let conn = get_conn(&self.pool)?;
        conn.execute(
            "INSERT INTO task_categories (user_id, name, color) VALUES (?1, ?2, ?3)",
            params![user_id, name, color],
        )?;
        let id = conn.last_insert_rowid();
        info!("Created task category '{}' for user {}", name, user_id);
        Ok(TaskCategory {
            id,
            user_id,
            name: name.to_string(),
            color: color.to_string(),
        })
    }

    pub fn get_category(&self, user_id: i64, category_id: i64) -> anyhow::Result<Option<TaskCategory>> {
        let conn = get_conn(&self.pool)?;
        let category = conn
            .query_row(
                "SELECT id, user_id, name, color FROM task_categories WHERE id = ?1 AND user_id = ?2",
                params![category_id, user_id],
                Self::row_to_category,
            )
            .optional()?;
        Ok(category)
    }

    pub fn list_categories(&self, user_id: i64) -> anyhow::Result<Vec<TaskCategory>> {
        let conn = get_conn(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, color FROM task_categories WHERE user_id = ?1 ORDER BY name",
        )?;
        let categories = stmt
            .query_map([user_id], Self::row_to_category)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }

    /// Tasks in the category survive with `category_id` set to NULL.
    pub fn delete_category(&self, user_id: i64, category_id: i64) -> anyhow::Result<bool> {
        let conn = get_conn(&self.pool)?;
        let deleted = conn.execute(
            "DELETE FROM task_categories WHERE id = ?1 AND user_id = ?2",
            params![category_id, user_id],
        )?;
        if deleted > 0 {
            info!("Deleted task category {} for user {}", category_id, user_id);
        }
        Ok(deleted > 0)
    }
}
