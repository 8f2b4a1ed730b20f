use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CalendarConnection, Provider, UpsertCalendarConnection};
use crate::error::{AppError, AppResult};

const CONNECTION_COLUMNS: &str = r#"
    id, user_id, provider, feed_url, access_token, refresh_token, token_expires_at,
    sync_enabled, last_synced_at, last_sync_status, last_sync_error, created_at, updated_at
"#;

pub const SYNC_STATUS_SUCCESS: &str = "success";
pub const SYNC_STATUS_FAILED: &str = "failed";

/// Repository for `calendar_connections`. One row per `(user, provider)`.
pub struct ConnectionRepository;

impl ConnectionRepository {
    pub async fn list_for_user(
        pool: &SqlitePool,
        user_id: &str,
    ) -> AppResult<Vec<CalendarConnection>> {
        let sql = format!(
            "SELECT {} FROM calendar_connections WHERE user_id = ? ORDER BY provider",
            CONNECTION_COLUMNS
        );
        sqlx::query_as::<_, CalendarConnection>(&sql)
            .bind(user_id)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn find(
        pool: &SqlitePool,
        user_id: &str,
        provider: Provider,
    ) -> AppResult<Option<CalendarConnection>> {
        let sql = format!(
            "SELECT {} FROM calendar_connections WHERE user_id = ? AND provider = ?",
            CONNECTION_COLUMNS
        );
        sqlx::query_as::<_, CalendarConnection>(&sql)
            .bind(user_id)
            .bind(provider.as_str())
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<CalendarConnection>> {
        let sql = format!(
            "SELECT {} FROM calendar_connections WHERE id = ?",
            CONNECTION_COLUMNS
        );
        sqlx::query_as::<_, CalendarConnection>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Enabled connections of `provider` whose owner has not switched
    /// auto-sync off in their settings.
    pub async fn list_auto_sync(
        pool: &SqlitePool,
        provider: Provider,
    ) -> AppResult<Vec<CalendarConnection>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM calendar_connections
            WHERE provider = ?
              AND sync_enabled = 1
              AND NOT EXISTS (
                  SELECT 1 FROM user_settings s
                  WHERE s.user_id = calendar_connections.user_id
                    AND s.auto_sync_enabled = 0
              )
            ORDER BY created_at
            "#,
            CONNECTION_COLUMNS
        );
        sqlx::query_as::<_, CalendarConnection>(&sql)
            .bind(provider.as_str())
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Create the connection or update the supplied fields of the existing one.
    /// Fields left as `None` keep their stored value.
    pub async fn upsert(
        pool: &SqlitePool,
        user_id: &str,
        provider: Provider,
        upsert: UpsertCalendarConnection,
    ) -> AppResult<CalendarConnection> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let sql = format!(
            r#"
            INSERT INTO calendar_connections (
                id, user_id, provider, feed_url, access_token, refresh_token,
                token_expires_at, sync_enabled, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, COALESCE(?, 1), ?, ?)
            ON CONFLICT(user_id, provider) DO UPDATE SET
                feed_url = COALESCE(excluded.feed_url, calendar_connections.feed_url),
                access_token = COALESCE(excluded.access_token, calendar_connections.access_token),
                refresh_token = COALESCE(excluded.refresh_token, calendar_connections.refresh_token),
                token_expires_at = COALESCE(excluded.token_expires_at, calendar_connections.token_expires_at),
                sync_enabled = COALESCE(?, calendar_connections.sync_enabled),
                updated_at = excluded.updated_at
            RETURNING {}
            "#,
            CONNECTION_COLUMNS
        );

        sqlx::query_as::<_, CalendarConnection>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(provider.as_str())
            .bind(upsert.feed_url)
            .bind(upsert.access_token)
            .bind(upsert.refresh_token)
            .bind(upsert.token_expires_at)
            .bind(upsert.sync_enabled)
            .bind(now)
            .bind(now)
            .bind(upsert.sync_enabled)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn delete(pool: &SqlitePool, user_id: &str, provider: Provider) -> AppResult<bool> {
        let result =
            sqlx::query("DELETE FROM calendar_connections WHERE user_id = ? AND provider = ?")
                .bind(user_id)
                .bind(provider.as_str())
                .execute(pool)
                .await
                .map_err(AppError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// Record the outcome of a sync attempt. `last_synced_at` only moves on
    /// success.
    pub async fn record_sync(
        pool: &SqlitePool,
        id: &str,
        error: Option<&str>,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        let status = if error.is_some() {
            SYNC_STATUS_FAILED
        } else {
            SYNC_STATUS_SUCCESS
        };

        sqlx::query(
            r#"
            UPDATE calendar_connections
            SET last_synced_at = CASE WHEN ? IS NULL THEN ? ELSE last_synced_at END,
                last_sync_status = ?,
                last_sync_error = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(status)
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Persist a refreshed OAuth token. A `None` refresh token keeps the old one.
    pub async fn update_tokens(
        pool: &SqlitePool,
        id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<NaiveDateTime>,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            UPDATE calendar_connections
            SET access_token = ?,
                refresh_token = COALESCE(?, refresh_token),
                token_expires_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }
}
