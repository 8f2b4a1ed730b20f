use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::Message;
use crate::error::{AppError, AppResult};

pub struct MessageRepository;

impl MessageRepository {
    pub async fn send(
        pool: &SqlitePool,
        sender_id: &str,
        recipient_id: &str,
        body: &str,
    ) -> AppResult<Message> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (id, sender_id, recipient_id, body, read_at, created_at)
            VALUES (?, ?, ?, ?, NULL, ?)
            RETURNING id, sender_id, recipient_id, body, read_at, created_at
            "#,
        )
        .bind(id)
        .bind(sender_id)
        .bind(recipient_id)
        .bind(body)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Both directions of the conversation between two users, oldest first.
    pub async fn conversation(
        pool: &SqlitePool,
        user_id: &str,
        peer_id: &str,
    ) -> AppResult<Vec<Message>> {
        sqlx::query_as::<_, Message>(
            r#"
            SELECT id, sender_id, recipient_id, body, read_at, created_at
            FROM messages
            WHERE (sender_id = ? AND recipient_id = ?)
               OR (sender_id = ? AND recipient_id = ?)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .bind(peer_id)
        .bind(peer_id)
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Mark everything `peer_id` sent to `user_id` as read.
    pub async fn mark_read(pool: &SqlitePool, user_id: &str, peer_id: &str) -> AppResult<u64> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET read_at = ?
            WHERE recipient_id = ? AND sender_id = ? AND read_at IS NULL
            "#,
        )
        .bind(now)
        .bind(user_id)
        .bind(peer_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }
}
