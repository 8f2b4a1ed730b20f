use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::models::{CalendarConnection, Provider, UpsertCalendarConnection};
use crate::db::{ConnectionRepository, EventRepository};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::services::calendar::CalendarSyncManager;
use crate::services::feeds::normalize_feed_url;
use crate::services::google;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_connections).post(upsert_connection))
        .route("/:provider", delete(delete_connection))
        .route("/:provider/sync", post(sync_connection))
}

#[derive(Debug, Deserialize)]
pub struct UpsertConnectionRequest {
    pub provider: String,
    pub feed_url: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Seconds until `access_token` expires.
    pub expires_in: Option<i64>,
    pub token_expires_at: Option<NaiveDateTime>,
    pub sync_enabled: Option<bool>,
}

fn parse_provider(raw: &str) -> AppResult<Provider> {
    Provider::try_from(raw).map_err(AppError::BadRequest)
}

async fn list_connections(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
) -> AppResult<Json<Vec<CalendarConnection>>> {
    let connections = ConnectionRepository::list_for_user(&state.db, &session.user_id).await?;
    Ok(Json(connections))
}

async fn upsert_connection(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Json(req): Json<UpsertConnectionRequest>,
) -> AppResult<Json<CalendarConnection>> {
    let provider = parse_provider(&req.provider)?;
    let existing = ConnectionRepository::find(&state.db, &session.user_id, provider).await?;

    let mut upsert = UpsertCalendarConnection {
        sync_enabled: req.sync_enabled,
        ..Default::default()
    };

    match provider {
        Provider::Canvas | Provider::Apple => {
            upsert.feed_url = match req.feed_url.as_deref() {
                Some(url) => Some(normalize_feed_url(url)?),
                None if existing.is_some() => None,
                None => {
                    return Err(AppError::Validation(format!(
                        "A feed URL is required for {}",
                        provider.as_str()
                    )))
                }
            };
        }
        Provider::Google => {
            if existing.is_none() && req.access_token.is_none() && req.refresh_token.is_none() {
                return Err(AppError::Validation(
                    "An access or refresh token is required for google".to_string(),
                ));
            }
            upsert.access_token = req.access_token;
            upsert.refresh_token = req.refresh_token;
            upsert.token_expires_at = match (req.token_expires_at, req.expires_in) {
                (Some(at), _) => Some(at),
                (None, Some(secs)) => {
                    let at = google::token_expiry(Utc::now(), secs).ok_or_else(|| {
                        AppError::Validation("expires_in is out of range".to_string())
                    })?;
                    Some(at)
                }
                (None, None) => None,
            };
        }
        Provider::Manual => {
            return Err(AppError::BadRequest(
                "Manual events do not use a connection".to_string(),
            ))
        }
    }

    let connection =
        ConnectionRepository::upsert(&state.db, &session.user_id, provider, upsert).await?;
    tracing::info!(
        "Saved {} connection {} for user {}",
        provider.as_str(),
        connection.id,
        session.user_id
    );
    Ok(Json(connection))
}

/// Remove the connection and everything it synced.
async fn delete_connection(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Path(provider): Path<String>,
) -> AppResult<Json<Value>> {
    let provider = parse_provider(&provider)?;
    if !ConnectionRepository::delete(&state.db, &session.user_id, provider).await? {
        return Err(AppError::NotFound(format!(
            "No {} connection",
            provider.as_str()
        )));
    }
    let removed = EventRepository::delete_for_provider(&state.db, &session.user_id, provider).await?;

    Ok(Json(json!({
        "deleted": true,
        "events_removed": removed
    })))
}

async fn sync_connection(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Path(provider): Path<String>,
) -> AppResult<Json<Value>> {
    let provider = parse_provider(&provider)?;
    let connection = ConnectionRepository::find(&state.db, &session.user_id, provider)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No {} connection", provider.as_str())))?;

    let body = if provider == Provider::Google {
        let report = google::sync_connection(&state, &session.user_id, &connection.id, None).await?;
        serde_json::to_value(report).map_err(|e| AppError::Internal(e.into()))?
    } else {
        let result = CalendarSyncManager::sync_ics_connection(&state, &connection).await?;
        serde_json::to_value(result).map_err(|e| AppError::Internal(e.into()))?
    };
    Ok(Json(body))
}
