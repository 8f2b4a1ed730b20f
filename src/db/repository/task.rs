use chrono::{NaiveDateTime, Utc};
use sqlx::{SqliteExecutor, SqlitePool};
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::db::models::{Task, TaskDraft};
use crate::error::{AppError, AppResult};

const TASK_COLUMNS: &str = r#"
    id, user_id, title, description, due_date, priority, completed, completed_at,
    source_provider, source_task_id, created_at, updated_at
"#;

/// `source_provider` recorded on tasks converted from a stored event. The
/// event row id goes into `source_task_id`.
pub const EVENT_SOURCE: &str = "event";

pub struct TaskRepository;

impl TaskRepository {
    /// Open tasks first, then by due date (undated last), then priority.
    pub async fn list_for_user(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<Task>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM tasks
            WHERE user_id = ?
            ORDER BY completed ASC, due_date IS NULL, due_date ASC, priority DESC, created_at ASC
            "#,
            TASK_COLUMNS
        );
        sqlx::query_as::<_, Task>(&sql)
            .bind(user_id)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn find<'e, E>(executor: E, user_id: &str, id: &str) -> AppResult<Option<Task>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "SELECT {} FROM tasks WHERE id = ? AND user_id = ?",
            TASK_COLUMNS
        );
        sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(executor)
            .await
            .map_err(AppError::Database)
    }

    pub async fn create(pool: &SqlitePool, user_id: &str, draft: &TaskDraft) -> AppResult<Task> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let completed_at = draft.completed.then_some(now);

        let sql = format!(
            r#"
            INSERT INTO tasks (
                id, user_id, title, description, due_date, priority, completed, completed_at,
                source_provider, source_task_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(&draft.title)
            .bind(&draft.description)
            .bind(draft.due_date)
            .bind(draft.priority.as_i64())
            .bind(draft.completed)
            .bind(completed_at)
            .bind(&draft.source_provider)
            .bind(&draft.source_task_id)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict("Task already exists for this source".to_string())
                } else {
                    AppError::Database(e)
                }
            })
    }

    /// Re-save the user-editable fields. Completion is changed through
    /// [`TaskRepository::set_completed`].
    pub async fn update(
        pool: &SqlitePool,
        user_id: &str,
        id: &str,
        draft: &TaskDraft,
    ) -> AppResult<Option<Task>> {
        let now = Utc::now().naive_utc();
        let sql = format!(
            r#"
            UPDATE tasks
            SET title = ?,
                description = ?,
                due_date = ?,
                priority = ?,
                updated_at = ?
            WHERE id = ? AND user_id = ?
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        sqlx::query_as::<_, Task>(&sql)
            .bind(&draft.title)
            .bind(&draft.description)
            .bind(draft.due_date)
            .bind(draft.priority.as_i64())
            .bind(now)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn delete(pool: &SqlitePool, user_id: &str, id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_completed<'e, E>(
        executor: E,
        user_id: &str,
        id: &str,
        completed: bool,
        completed_at: Option<NaiveDateTime>,
    ) -> AppResult<Task>
    where
        E: SqliteExecutor<'e>,
    {
        let now = Utc::now().naive_utc();
        let sql = format!(
            r#"
            UPDATE tasks
            SET completed = ?,
                completed_at = ?,
                updated_at = ?
            WHERE id = ? AND user_id = ?
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        sqlx::query_as::<_, Task>(&sql)
            .bind(completed)
            .bind(completed_at)
            .bind(now)
            .bind(id)
            .bind(user_id)
            .fetch_optional(executor)
            .await
            .map_err(AppError::Database)?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))
    }

    /// Insert or refresh an imported task keyed by
    /// `(user, source_provider, source_task_id)`.
    pub async fn upsert_imported<'e, E>(
        executor: E,
        user_id: &str,
        draft: &TaskDraft,
    ) -> AppResult<Task>
    where
        E: SqliteExecutor<'e>,
    {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let completed_at = draft.completed.then_some(now);

        let sql = format!(
            r#"
            INSERT INTO tasks (
                id, user_id, title, description, due_date, priority, completed, completed_at,
                source_provider, source_task_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, source_provider, source_task_id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                due_date = excluded.due_date,
                priority = excluded.priority,
                completed = excluded.completed,
                completed_at = CASE
                    WHEN excluded.completed = 0 THEN NULL
                    ELSE COALESCE(tasks.completed_at, excluded.completed_at)
                END,
                updated_at = excluded.updated_at
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(&draft.title)
            .bind(&draft.description)
            .bind(draft.due_date)
            .bind(draft.priority.as_i64())
            .bind(draft.completed)
            .bind(completed_at)
            .bind(&draft.source_provider)
            .bind(&draft.source_task_id)
            .bind(now)
            .bind(now)
            .fetch_one(executor)
            .await
            .map_err(AppError::Database)
    }

    /// Ids of stored events this user has already turned into tasks.
    pub async fn converted_event_ids(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT source_task_id FROM tasks WHERE user_id = ? AND source_provider = ? AND source_task_id IS NOT NULL",
        )
        .bind(user_id)
        .bind(EVENT_SOURCE)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
