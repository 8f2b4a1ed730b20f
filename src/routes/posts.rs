use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::db::models::Post;
use crate::error::AppResult;
use crate::routes::auth::AuthUser;
use crate::services::social::{self, FeedItem};
use crate::AppState;

const DEFAULT_FEED_LIMIT: i64 = 50;
const MAX_FEED_LIMIT: i64 = 200;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_feed).post(create_post))
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub content: String,
    pub image_url: Option<String>,
}

async fn get_feed(
    State(state): State<Arc<AppState>>,
    AuthUser(_session): AuthUser,
    Query(query): Query<FeedQuery>,
) -> AppResult<Json<Vec<FeedItem>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_FEED_LIMIT)
        .clamp(1, MAX_FEED_LIMIT);
    Ok(Json(social::feed(&state.db, limit).await?))
}

async fn create_post(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Json(req): Json<CreatePostRequest>,
) -> AppResult<(StatusCode, Json<Post>)> {
    let image_url = req.image_url.as_deref().filter(|u| !u.trim().is_empty());
    let post = social::create_post(&state.db, &session.user_id, &req.content, image_url).await?;
    Ok((StatusCode::CREATED, Json(post)))
}
