use chrono::{Duration, NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{Post, PromotedPost, PromotionStatus};
use crate::error::{AppError, AppResult};

pub struct PostRepository;

impl PostRepository {
    pub async fn create(
        pool: &SqlitePool,
        user_id: &str,
        content: &str,
        image_url: Option<&str>,
    ) -> AppResult<Post> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (id, user_id, content, image_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, user_id, content, image_url, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(content)
        .bind(image_url)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find(pool: &SqlitePool, id: &str) -> AppResult<Option<Post>> {
        sqlx::query_as::<_, Post>(
            "SELECT id, user_id, content, image_url, created_at, updated_at FROM posts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Newest first.
    pub async fn list_recent(pool: &SqlitePool, limit: i64) -> AppResult<Vec<Post>> {
        sqlx::query_as::<_, Post>(
            r#"
            SELECT id, user_id, content, image_url, created_at, updated_at
            FROM posts
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }
}

const PROMOTION_COLUMNS: &str = r#"
    id, post_id, user_id, budget, duration_days, priority_score, status, starts_at, ends_at, created_at
"#;

pub struct PromotionRepository;

impl PromotionRepository {
    /// Store a promotion. Active promotions start now and run for
    /// `duration_days`; pending ones have no window or score yet.
    pub async fn create(
        pool: &SqlitePool,
        post_id: &str,
        user_id: &str,
        budget: f64,
        duration_days: i64,
        status: PromotionStatus,
        priority_score: Option<i64>,
    ) -> AppResult<PromotedPost> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let (starts_at, ends_at) = match status {
            PromotionStatus::Active => (Some(now), Some(now + Duration::days(duration_days))),
            PromotionStatus::PendingPayment => (None, None),
        };

        let sql = format!(
            r#"
            INSERT INTO promoted_posts (
                id, post_id, user_id, budget, duration_days, priority_score, status,
                starts_at, ends_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {}
            "#,
            PROMOTION_COLUMNS
        );

        sqlx::query_as::<_, PromotedPost>(&sql)
            .bind(id)
            .bind(post_id)
            .bind(user_id)
            .bind(budget)
            .bind(duration_days)
            .bind(priority_score)
            .bind(status.as_str())
            .bind(starts_at)
            .bind(ends_at)
            .bind(now)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Active promotions whose window contains `now`, highest priority first.
    pub async fn list_live(pool: &SqlitePool, now: NaiveDateTime) -> AppResult<Vec<PromotedPost>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM promoted_posts
            WHERE status = ? AND starts_at <= ? AND ends_at > ?
            ORDER BY priority_score DESC, created_at ASC
            "#,
            PROMOTION_COLUMNS
        );
        sqlx::query_as::<_, PromotedPost>(&sql)
            .bind(PromotionStatus::Active.as_str())
            .bind(now)
            .bind(now)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }
}
