use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

// ============================================================================
// Promotions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionStatus {
    PendingPayment,
    Active,
}

impl PromotionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PromotionStatus::PendingPayment => "pending_payment",
            PromotionStatus::Active => "active",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PromotedPost {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub budget: f64,
    pub duration_days: i64,
    pub priority_score: Option<i64>,
    pub status: String,
    pub starts_at: Option<NaiveDateTime>,
    pub ends_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl PromotedPost {
    /// Active and inside its paid window at `now`.
    pub fn is_live(&self, now: NaiveDateTime) -> bool {
        self.status == PromotionStatus::Active.as_str()
            && self.starts_at.is_some_and(|s| s <= now)
            && self.ends_at.is_some_and(|e| now < e)
    }
}

// ============================================================================
// Direct messages
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub read_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}
