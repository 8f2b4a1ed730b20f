use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::db::models::{Profile, UpdateProfile};
use crate::db::ProfileRepository;
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::services::social::{self, Suggestion};
use crate::AppState;

const DEFAULT_SUGGESTIONS: usize = 20;
const MAX_SUGGESTIONS: usize = 100;
const MAX_FACET_ITEMS: usize = 30;

pub fn profile_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_profile).put(update_profile))
}

pub fn people_router() -> Router<Arc<AppState>> {
    Router::new().route("/suggested", get(suggested))
}

#[derive(Debug, Deserialize)]
pub struct SuggestedQuery {
    pub limit: Option<usize>,
}

async fn get_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
) -> AppResult<Json<Profile>> {
    ProfileRepository::find(&state.db, &session.user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Profile not found".to_string()))
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Json(update): Json<UpdateProfile>,
) -> AppResult<Json<Profile>> {
    for (name, items) in [
        ("interests", &update.interests),
        ("music", &update.music),
        ("clubs", &update.clubs),
    ] {
        if items.as_ref().is_some_and(|v| v.len() > MAX_FACET_ITEMS) {
            return Err(AppError::Validation(format!(
                "At most {} {} allowed",
                MAX_FACET_ITEMS, name
            )));
        }
    }
    if let Some(year) = update.graduation_year {
        if !(1900..=2200).contains(&year) {
            return Err(AppError::Validation("Invalid graduation year".to_string()));
        }
    }

    let profile = ProfileRepository::upsert(&state.db, &session.user_id, update).await?;
    Ok(Json(profile))
}

async fn suggested(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Query(query): Query<SuggestedQuery>,
) -> AppResult<Json<Vec<Suggestion>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SUGGESTIONS)
        .clamp(1, MAX_SUGGESTIONS);
    Ok(Json(
        social::suggested_connections(&state.db, &session.user_id, limit).await?,
    ))
}
