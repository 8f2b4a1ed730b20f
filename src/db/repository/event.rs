use chrono::{NaiveDateTime, Utc};
use sqlx::{SqliteExecutor, SqlitePool};
use uuid::Uuid;

use crate::db::models::{CalendarEvent, EventType, Provider, StoredEvent};
use crate::error::{AppError, AppResult};

const EVENT_COLUMNS: &str = r#"
    id, user_id, source_provider, source_event_id, title, description,
    start_time, end_time, location, event_type, created_at, updated_at
"#;

/// Repository for the `events` table.
///
/// Write methods take any executor so the reconciler can run them on a
/// transaction connection.
pub struct EventRepository;

impl EventRepository {
    /// All stored events for one `(user, provider)` pair, oldest row first.
    pub async fn find_by_user_provider<'e, E>(
        executor: E,
        user_id: &str,
        provider: Provider,
    ) -> AppResult<Vec<StoredEvent>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "SELECT {} FROM events WHERE user_id = ? AND source_provider = ? ORDER BY created_at, id",
            EVENT_COLUMNS
        );
        sqlx::query_as::<_, StoredEvent>(&sql)
            .bind(user_id)
            .bind(provider.as_str())
            .fetch_all(executor)
            .await
            .map_err(AppError::Database)
    }

    pub async fn insert<'e, E>(executor: E, user_id: &str, event: &CalendarEvent) -> AppResult<()>
    where
        E: SqliteExecutor<'e>,
    {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO events (
                id, user_id, source_provider, source_event_id, title, description,
                start_time, end_time, location, event_type, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(event.source_provider.as_str())
        .bind(&event.source_event_id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.start_time.naive_utc())
        .bind(event.end_time.naive_utc())
        .bind(&event.location)
        .bind(event.event_type.as_str())
        .bind(now)
        .bind(now)
        .execute(executor)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Rewrite every feed-owned field of a stored row.
    pub async fn update<'e, E>(executor: E, id: &str, event: &CalendarEvent) -> AppResult<()>
    where
        E: SqliteExecutor<'e>,
    {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE events
            SET title = ?,
                description = ?,
                start_time = ?,
                end_time = ?,
                location = ?,
                event_type = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.start_time.naive_utc())
        .bind(event.end_time.naive_utc())
        .bind(&event.location)
        .bind(event.event_type.as_str())
        .bind(now)
        .bind(id)
        .execute(executor)
        .await
        .map_err(AppError::Database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Event {} not found", id)));
        }
        Ok(())
    }

    pub async fn delete<'e, E>(executor: E, id: &str) -> AppResult<()>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    /// Events overlapping `[from, to)`, by start time.
    pub async fn list_in_range(
        pool: &SqlitePool,
        user_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> AppResult<Vec<StoredEvent>> {
        let sql = format!(
            "SELECT {} FROM events WHERE user_id = ? AND start_time < ? AND end_time >= ? ORDER BY start_time",
            EVENT_COLUMNS
        );
        sqlx::query_as::<_, StoredEvent>(&sql)
            .bind(user_id)
            .bind(to)
            .bind(from)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Assignment and exam events for a user, by end time.
    pub async fn list_assignment_like(
        pool: &SqlitePool,
        user_id: &str,
    ) -> AppResult<Vec<StoredEvent>> {
        let sql = format!(
            "SELECT {} FROM events WHERE user_id = ? AND event_type IN (?, ?) ORDER BY end_time",
            EVENT_COLUMNS
        );
        sqlx::query_as::<_, StoredEvent>(&sql)
            .bind(user_id)
            .bind(EventType::Assignment.as_str())
            .bind(EventType::Exam.as_str())
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        user_id: &str,
        id: &str,
    ) -> AppResult<Option<StoredEvent>> {
        let sql = format!(
            "SELECT {} FROM events WHERE id = ? AND user_id = ?",
            EVENT_COLUMNS
        );
        sqlx::query_as::<_, StoredEvent>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Remove everything a provider synced for a user (used when the
    /// connection itself is removed).
    pub async fn delete_for_provider(
        pool: &SqlitePool,
        user_id: &str,
        provider: Provider,
    ) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM events WHERE user_id = ? AND source_provider = ?")
            .bind(user_id)
            .bind(provider.as_str())
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }
}
