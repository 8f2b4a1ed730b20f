//! Friend suggestions, the post feed and post promotions.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::models::{Post, Profile, PromotedPost, PromotionStatus};
use crate::db::{PostRepository, ProfileRepository, PromotionRepository};
use crate::error::{AppError, AppResult};
use crate::scoring::{match_score, promotion_priority};

/// Every n-th feed slot is reserved for a promotion.
pub const PROMOTION_SLOT_INTERVAL: usize = 4;
pub const MAX_PROMOTION_DAYS: i64 = 30;
pub const MAX_POST_LEN: usize = 5_000;

#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub profile: Profile,
    pub match_score: u32,
}

/// Rank `candidates` against `me`: zero scores dropped, best first, ties by
/// display name.
pub fn rank_suggestions(me: &Profile, candidates: Vec<Profile>, limit: usize) -> Vec<Suggestion> {
    let facets = me.facets();
    let mut ranked: Vec<Suggestion> = candidates
        .into_iter()
        .filter(|p| p.user_id != me.user_id)
        .map(|p| Suggestion {
            match_score: match_score(&facets, &p.facets()),
            profile: p,
        })
        .filter(|s| s.match_score > 0)
        .collect();

    ranked.sort_by(|a, b| {
        b.match_score
            .cmp(&a.match_score)
            .then_with(|| a.profile.display_name.cmp(&b.profile.display_name))
    });
    ranked.truncate(limit);
    ranked
}

pub async fn suggested_connections(
    pool: &SqlitePool,
    user_id: &str,
    limit: usize,
) -> AppResult<Vec<Suggestion>> {
    let me = ProfileRepository::find(pool, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Complete your profile to get suggestions".to_string()))?;
    let others = ProfileRepository::list_others(pool, user_id).await?;
    Ok(rank_suggestions(&me, others, limit))
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedItem {
    #[serde(flatten)]
    pub post: Post,
    pub promoted: bool,
    pub promotion_id: Option<String>,
    pub priority_score: Option<i64>,
}

/// Merge organic posts (newest first) with live promotions (highest priority
/// first). Promotions take every [`PROMOTION_SLOT_INTERVAL`]-th slot while
/// organic posts remain; a promoted post is not repeated organically.
pub fn rank_feed(organic: Vec<Post>, promotions: Vec<(PromotedPost, Post)>) -> Vec<FeedItem> {
    let promoted_ids: HashSet<String> = promotions.iter().map(|(_, p)| p.id.clone()).collect();
    let mut organic: VecDeque<Post> = organic
        .into_iter()
        .filter(|p| !promoted_ids.contains(&p.id))
        .collect();
    let mut promotions: VecDeque<(PromotedPost, Post)> = promotions.into();

    let mut feed = Vec::with_capacity(organic.len() + promotions.len());
    while !organic.is_empty() {
        if (feed.len() + 1) % PROMOTION_SLOT_INTERVAL == 0 {
            if let Some((promotion, post)) = promotions.pop_front() {
                feed.push(FeedItem {
                    post,
                    promoted: true,
                    promotion_id: Some(promotion.id),
                    priority_score: promotion.priority_score,
                });
                continue;
            }
        }
        if let Some(post) = organic.pop_front() {
            feed.push(FeedItem {
                post,
                promoted: false,
                promotion_id: None,
                priority_score: None,
            });
        }
    }
    feed
}

pub async fn feed(pool: &SqlitePool, limit: i64) -> AppResult<Vec<FeedItem>> {
    let organic = PostRepository::list_recent(pool, limit).await?;
    let live = PromotionRepository::list_live(pool, Utc::now().naive_utc()).await?;

    let mut cache: HashMap<String, Post> = organic.iter().map(|p| (p.id.clone(), p.clone())).collect();
    let mut promotions = Vec::with_capacity(live.len());
    for promotion in live {
        let post = match cache.get(&promotion.post_id) {
            Some(p) => Some(p.clone()),
            None => PostRepository::find(pool, &promotion.post_id).await?,
        };
        match post {
            Some(post) => {
                cache.insert(post.id.clone(), post.clone());
                promotions.push((promotion, post));
            }
            None => tracing::warn!(
                "Promotion {} points at missing post {}",
                promotion.id,
                promotion.post_id
            ),
        }
    }

    Ok(rank_feed(organic, promotions))
}

pub async fn create_post(
    pool: &SqlitePool,
    user_id: &str,
    content: &str,
    image_url: Option<&str>,
) -> AppResult<Post> {
    let content = content.trim();
    if content.is_empty() && image_url.is_none() {
        return Err(AppError::Validation("Post is empty".to_string()));
    }
    if content.chars().count() > MAX_POST_LEN {
        return Err(AppError::Validation(format!(
            "Post is longer than {} characters",
            MAX_POST_LEN
        )));
    }
    PostRepository::create(pool, user_id, content, image_url).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePromotionRequest {
    pub post_id: String,
    pub budget: f64,
    pub duration_days: i64,
    #[serde(default)]
    pub skip_payment: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionCreated {
    pub promotion_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_score: Option<i64>,
    pub status: PromotionStatus,
}

pub fn validate_promotion(req: &CreatePromotionRequest) -> AppResult<()> {
    if !req.budget.is_finite() || req.budget <= 0.0 {
        return Err(AppError::Validation("Budget must be greater than zero".to_string()));
    }
    if !(1..=MAX_PROMOTION_DAYS).contains(&req.duration_days) {
        return Err(AppError::Validation(format!(
            "Duration must be between 1 and {} days",
            MAX_PROMOTION_DAYS
        )));
    }
    Ok(())
}

/// Promote one of the caller's posts. Without `skip_payment` the promotion
/// waits for payment and has no score yet.
pub async fn create_promotion(
    pool: &SqlitePool,
    user_id: &str,
    req: CreatePromotionRequest,
) -> AppResult<PromotionCreated> {
    validate_promotion(&req)?;

    let post = PostRepository::find(pool, &req.post_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Post {} not found", req.post_id)))?;
    if post.user_id != user_id {
        return Err(AppError::Forbidden);
    }

    let (status, score) = if req.skip_payment {
        (
            PromotionStatus::Active,
            Some(promotion_priority(req.budget, req.duration_days)),
        )
    } else {
        (PromotionStatus::PendingPayment, None)
    };

    let promotion = PromotionRepository::create(
        pool,
        &post.id,
        user_id,
        req.budget,
        req.duration_days,
        status,
        score,
    )
    .await?;

    tracing::info!(
        "Created {} promotion {} for post {} (score {:?})",
        status.as_str(),
        promotion.id,
        post.id,
        score
    );

    Ok(PromotionCreated {
        promotion_id: promotion.id,
        priority_score: promotion.priority_score,
        status,
    })
}
