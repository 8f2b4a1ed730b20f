#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use studyhub::config::Config;
use studyhub::services::calendar::SyncLocks;
use studyhub::services::google::GoogleService;
use studyhub::services::http::RetryPolicy;
use studyhub::services::init::run_migrations;
use studyhub::AppState;

pub const JWT_SECRET: &str = "integration-secret";
pub const CRON_SECRET: &str = "nightly-cron-secret";

/// A fresh in-memory database. One connection that never idles out, so
/// every query sees the same database.
pub async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("open in-memory sqlite");
    run_migrations(&pool).await.expect("run migrations");
    pool
}

pub fn test_config(upstream: Option<&str>) -> Config {
    let mut config = Config::default();
    config.jwt.secret = JWT_SECRET.to_string();
    config.sync.auto_sync_enabled = false;
    config.sync.fetch_timeout_seconds = 5;
    config.sync.cron_secret = Some(CRON_SECRET.to_string());
    config.rate_limit.functions_per_second = 100;
    config.rate_limit.functions_burst = 100;
    if let Some(base) = upstream {
        config.google.client_id = Some("client-id".to_string());
        config.google.client_secret = Some("client-secret".to_string());
        config.google.token_url = format!("{}/token", base);
        config.google.calendar_api_url = format!("{}/calendar/v3", base);
        config.google.tasks_api_url = format!("{}/tasks/v1", base);
    }
    config
}

/// App state without outbound retries, so failing mocks answer fast.
pub async fn test_state(upstream: Option<&str>) -> Arc<AppState> {
    let config = test_config(upstream);
    let state = AppState::new(test_pool().await, config).expect("build state");
    let google = GoogleService::new(state.http.clone(), state.config.google.clone())
        .with_retry(RetryPolicy::none());
    Arc::new(AppState {
        google,
        sync_locks: SyncLocks::default(),
        ..state
    })
}

pub fn bearer(user_id: &str) -> String {
    let claims = serde_json::json!({
        "sub": user_id,
        "exp": (Utc::now() + Duration::hours(1)).timestamp(),
        "role": "authenticated",
    });
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("sign token");
    format!("Bearer {}", token)
}

pub const CANVAS_FEED: &str = "BEGIN:VCALENDAR\r
VERSION:2.0\r
PRODID:-//Instructure//Canvas//EN\r
BEGIN:VEVENT\r
UID:event-assignment-101\r
SUMMARY:Essay 1 [ENGL 101]\r
DTSTART:20241201T140000Z\r
DTEND:20241201T150000Z\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:event-assignment-102\r
SUMMARY:Problem Set 3 [MATH 221]\r
DESCRIPTION:Chapters 4 and 5\r
DTSTART;VALUE=DATE:20241203\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:event-calendar-event-7\r
SUMMARY:Office hours\r
DTSTART:20241202T180000Z\r
DTEND:20241202T190000Z\r
END:VEVENT\r
END:VCALENDAR\r
";
