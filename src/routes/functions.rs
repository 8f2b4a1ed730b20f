//! JSON-in / JSON-out function endpoints mounted under `/api/functions`.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::models::Provider;
use crate::db::ConnectionRepository;
use crate::error::{AppError, AppResult};
use crate::routes::auth::{AuthUser, MaybeAuthUser};
use crate::services::calendar::{BatchSummary, CalendarSyncManager};
use crate::services::canvas;
use crate::services::feeds::{FeedClient, FeedDiagnostics};
use crate::services::google::{self, GoogleSyncReport};
use crate::services::schedule_scan::{ScannedEvent, ScheduleScanner};
use crate::services::social::{self, CreatePromotionRequest, PromotionCreated};
use crate::AppState;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/canvas-colors", post(canvas_colors))
        .route("/canvas-sync", post(canvas_sync))
        .route("/canvas-debug", post(canvas_debug))
        .route("/google-sync", post(google_sync))
        .route("/create-promotion", post(create_promotion))
        .route("/scan-schedule", post(scan_schedule))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasColorsRequest {
    pub ics_url: String,
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasColorsResponse {
    pub course_colors: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct CanvasDebugRequest {
    pub connection_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleSyncRequest {
    pub connection_id: String,
    pub access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanScheduleRequest {
    pub image: String,
    pub mime_type: String,
}

#[derive(Debug, Serialize)]
pub struct ScanScheduleResponse {
    pub events: Vec<ScannedEvent>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn canvas_colors(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Json(req): Json<CanvasColorsRequest>,
) -> AppResult<Json<CanvasColorsResponse>> {
    if req.user_id != session.user_id {
        return Err(AppError::Forbidden);
    }
    let course_colors = canvas::sync_course_colors(&state, &session.user_id, &req.ics_url).await?;
    Ok(Json(CanvasColorsResponse { course_colors }))
}

/// Compare SHA-256 digests so the running time does not depend on where the
/// inputs first differ.
fn secrets_match(provided: &[u8], expected: &[u8]) -> bool {
    let provided = Sha256::digest(provided);
    let expected = Sha256::digest(expected);
    provided
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// With a valid `X-Cron-Secret` every enabled Canvas connection is synced;
/// with a bearer token only the caller's.
async fn canvas_sync(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    MaybeAuthUser(session): MaybeAuthUser,
) -> AppResult<Json<BatchSummary>> {
    if let Some(provided) = headers.get(CRON_SECRET_HEADER) {
        let expected = state.config.sync.cron_secret.as_deref().ok_or(AppError::Forbidden)?;
        if !secrets_match(provided.as_bytes(), expected.as_bytes()) {
            tracing::warn!("Rejected canvas-sync call with a wrong cron secret");
            return Err(AppError::Forbidden);
        }
        let summary = CalendarSyncManager::sync_all(&state, Provider::Canvas).await?;
        return Ok(Json(summary));
    }

    let session = session.ok_or(AppError::Unauthorized)?;
    let mut summary = BatchSummary::default();
    if let Some(connection) =
        ConnectionRepository::find(&state.db, &session.user_id, Provider::Canvas).await?
    {
        summary.connections_processed = 1;
        match CalendarSyncManager::sync_ics_connection(&state, &connection).await {
            Ok(result) => {
                summary.successful_syncs = 1;
                summary.total_events_processed = result.processed;
            }
            Err(e) => tracing::warn!(
                "Canvas sync failed for connection {}: {:?}",
                connection.id,
                e
            ),
        }
    }
    Ok(Json(summary))
}

async fn canvas_debug(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Json(req): Json<CanvasDebugRequest>,
) -> AppResult<Json<FeedDiagnostics>> {
    let connection = ConnectionRepository::find_by_id(&state.db, &req.connection_id)
        .await?
        .filter(|c| c.user_id == session.user_id)
        .ok_or_else(|| AppError::NotFound(format!("Connection {} not found", req.connection_id)))?;
    let provider = connection
        .provider()
        .filter(|p| p.is_ics_feed())
        .ok_or_else(|| AppError::BadRequest("Connection has no ICS feed".to_string()))?;
    let feed_url = connection
        .feed_url
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("Connection has no feed URL".to_string()))?;

    let diagnostics = FeedClient::new(state.http.clone())
        .diagnose(feed_url, provider)
        .await?;
    Ok(Json(diagnostics))
}

async fn google_sync(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Json(req): Json<GoogleSyncRequest>,
) -> AppResult<Json<GoogleSyncReport>> {
    let report =
        google::sync_connection(&state, &session.user_id, &req.connection_id, req.access_token)
            .await?;
    Ok(Json(report))
}

async fn create_promotion(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Json(req): Json<CreatePromotionRequest>,
) -> AppResult<Json<PromotionCreated>> {
    let created = social::create_promotion(&state.db, &session.user_id, req).await?;
    Ok(Json(created))
}

async fn scan_schedule(
    State(state): State<Arc<AppState>>,
    AuthUser(_session): AuthUser,
    Json(req): Json<ScanScheduleRequest>,
) -> AppResult<Json<ScanScheduleResponse>> {
    let events = ScheduleScanner::new(&state.http, &state.config.ai)
        .scan(&req.image, &req.mime_type)
        .await?;
    Ok(Json(ScanScheduleResponse { events }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_secret_comparison() {
        assert!(secrets_match(b"nightly-secret", b"nightly-secret"));
        assert!(!secrets_match(b"nightly-secreT", b"nightly-secret"));
        assert!(!secrets_match(b"nightly", b"nightly-secret"));
        assert!(!secrets_match(b"", b"nightly-secret"));
    }
}
