use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::db::models::Task;
use crate::db::TaskRepository;
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::services::tasks::{self, TaskInput};
use crate::AppState;

const MAX_BATCH: usize = 200;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        // Specific routes must come before the generic "/:id" route
        .route("/toggle", post(toggle_batch))
        .route("/from-event/:event_id", post(create_from_event))
        .route("/:id", put(update_task).delete(delete_task))
        .route("/:id/toggle", post(toggle_task))
}

#[derive(Debug, Deserialize)]
pub struct ToggleBatchRequest {
    pub task_ids: Vec<String>,
    /// Force every task into this state instead of flipping each one.
    pub completed: Option<bool>,
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
) -> AppResult<Json<Vec<Task>>> {
    Ok(Json(
        TaskRepository::list_for_user(&state.db, &session.user_id).await?,
    ))
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Json(input): Json<TaskInput>,
) -> AppResult<(StatusCode, Json<Task>)> {
    let task = tasks::create(&state.db, &session.user_id, input).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Path(id): Path<String>,
    Json(input): Json<TaskInput>,
) -> AppResult<Json<Task>> {
    Ok(Json(
        tasks::update(&state.db, &session.user_id, &id, input).await?,
    ))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    if TaskRepository::delete(&state.db, &session.user_id, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Task {} not found", id)))
    }
}

async fn toggle_task(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Task>> {
    Ok(Json(tasks::toggle(&state.db, &session.user_id, &id).await?))
}

async fn toggle_batch(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Json(req): Json<ToggleBatchRequest>,
) -> AppResult<Json<Vec<Task>>> {
    if req.task_ids.is_empty() {
        return Err(AppError::Validation("task_ids is empty".to_string()));
    }
    if req.task_ids.len() > MAX_BATCH {
        return Err(AppError::Validation(format!(
            "At most {} tasks per batch",
            MAX_BATCH
        )));
    }
    let updated =
        tasks::toggle_many(&state.db, &session.user_id, &req.task_ids, req.completed).await?;
    Ok(Json(updated))
}

async fn create_from_event(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Path(event_id): Path<String>,
) -> AppResult<(StatusCode, Json<Task>)> {
    let task = tasks::create_from_event(&state.db, &session.user_id, &event_id).await?;
    Ok((StatusCode::CREATED, Json(task)))
}
