use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::db::models::Message;
use crate::db::{MessageRepository, ProfileRepository};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::AppState;

const MAX_MESSAGE_LEN: usize = 4_000;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(send_message))
        .route("/:peer_id", get(get_conversation))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub recipient_id: String,
    pub body: String,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let body = req.body.trim();
    if body.is_empty() {
        return Err(AppError::Validation("Message is empty".to_string()));
    }
    if body.chars().count() > MAX_MESSAGE_LEN {
        return Err(AppError::Validation(format!(
            "Message is longer than {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    if req.recipient_id == session.user_id {
        return Err(AppError::BadRequest("Cannot message yourself".to_string()));
    }
    if ProfileRepository::find(&state.db, &req.recipient_id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound(format!(
            "User {} not found",
            req.recipient_id
        )));
    }

    let message =
        MessageRepository::send(&state.db, &session.user_id, &req.recipient_id, body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Returns the conversation and marks the peer's messages as read.
async fn get_conversation(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Path(peer_id): Path<String>,
) -> AppResult<Json<Vec<Message>>> {
    let messages = MessageRepository::conversation(&state.db, &session.user_id, &peer_id).await?;
    let marked = MessageRepository::mark_read(&state.db, &session.user_id, &peer_id).await?;
    if marked > 0 {
        tracing::debug!("Marked {} message(s) from {} as read", marked, peer_id);
    }
    Ok(Json(messages))
}
