use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::db::models::{UpdateUserSettings, UserSettings, DEFAULT_TIMEZONE};
use crate::error::{AppError, AppResult};

#[derive(FromRow)]
struct SettingsRow {
    user_id: String,
    timezone: String,
    course_colors: String,
    auto_sync_enabled: bool,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl From<SettingsRow> for UserSettings {
    fn from(row: SettingsRow) -> Self {
        let course_colors = serde_json::from_str(&row.course_colors).unwrap_or_else(|e| {
            tracing::warn!(
                "Discarding malformed course colours for user {}: {}",
                row.user_id,
                e
            );
            BTreeMap::new()
        });
        UserSettings {
            user_id: row.user_id,
            timezone: row.timezone,
            course_colors,
            auto_sync_enabled: row.auto_sync_enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Repository for `user_settings`. Missing rows read as defaults.
pub struct SettingsRepository;

impl SettingsRepository {
    pub async fn get(pool: &SqlitePool, user_id: &str) -> AppResult<UserSettings> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT user_id, timezone, course_colors, auto_sync_enabled, created_at, updated_at
            FROM user_settings
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(match row {
            Some(row) => row.into(),
            None => {
                let now = Utc::now().naive_utc();
                UserSettings {
                    user_id: user_id.to_string(),
                    timezone: DEFAULT_TIMEZONE.to_string(),
                    course_colors: BTreeMap::new(),
                    auto_sync_enabled: true,
                    created_at: now,
                    updated_at: now,
                }
            }
        })
    }

    /// Apply `update` on top of the current settings and store the result.
    /// Callers validate the timezone name.
    pub async fn update(
        pool: &SqlitePool,
        user_id: &str,
        update: UpdateUserSettings,
    ) -> AppResult<UserSettings> {
        let mut settings = Self::get(pool, user_id).await?;
        if let Some(tz) = update.timezone {
            settings.timezone = tz;
        }
        if let Some(colors) = update.course_colors {
            settings.course_colors = colors;
        }
        if let Some(flag) = update.auto_sync_enabled {
            settings.auto_sync_enabled = flag;
        }
        Self::save(pool, &settings).await
    }

    pub async fn save(pool: &SqlitePool, settings: &UserSettings) -> AppResult<UserSettings> {
        let now = Utc::now().naive_utc();
        let colors =
            serde_json::to_string(&settings.course_colors).map_err(|e| AppError::Internal(e.into()))?;

        sqlx::query(
            r#"
            INSERT INTO user_settings (
                user_id, timezone, course_colors, auto_sync_enabled, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                timezone = excluded.timezone,
                course_colors = excluded.course_colors,
                auto_sync_enabled = excluded.auto_sync_enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&settings.user_id)
        .bind(&settings.timezone)
        .bind(colors)
        .bind(settings.auto_sync_enabled)
        .bind(settings.created_at)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        let mut saved = settings.clone();
        saved.updated_at = now;
        Ok(saved)
    }
}
