use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::{body::Body, routing::get, Router};
use http::{HeaderValue, StatusCode};
use sqlx::SqlitePool;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod db;
pub mod error;
pub mod ics;
pub mod middleware;
pub mod routes;
pub mod scoring;
pub mod services;
pub mod timezone;

use config::Config;
use error::AppResult;
use services::calendar::SyncLocks;
use services::google::GoogleService;
use services::http::build_client;

pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    /// Shared outbound client (feeds, vision model).
    pub http: reqwest::Client,
    pub google: GoogleService,
    pub sync_locks: SyncLocks,
}

impl AppState {
    pub fn new(db: SqlitePool, config: Config) -> AppResult<Self> {
        let http = build_client(&config)?;
        let google = GoogleService::new(http.clone(), config.google.clone());
        Ok(Self {
            db,
            config,
            http,
            google,
            sync_locks: SyncLocks::default(),
        })
    }
}

fn rate_limited_response(error: GovernorError) -> http::Response<Body> {
    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            // Same error shape as `AppError -> IntoResponse`
            let body = serde_json::json!({
                "error": {
                    "code": "RATE_LIMITED",
                    "message": "Rate limit exceeded",
                    "details": { "retry_after_seconds": wait_time }
                }
            })
            .to_string();

            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;
            resp.headers_mut().insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp.headers_mut()
                .insert(http::header::RETRY_AFTER, HeaderValue::from(wait_time));
            resp
        }
        GovernorError::UnableToExtractKey => {
            let body = serde_json::json!({
                "error": {
                    "code": "INVALID_REQUEST",
                    "message": "Unable to determine client IP for rate limiting"
                }
            })
            .to_string();

            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() = StatusCode::BAD_REQUEST;
            resp.headers_mut().insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            resp
        }
        GovernorError::Other { code, msg, headers } => {
            let body = msg.unwrap_or_else(|| "Rate limiting error".to_string());
            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() =
                StatusCode::from_u16(code.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp
        }
    }
}

/// Build the HTTP application.
///
/// Also starts the std thread that prunes the `/api/functions` rate limiter;
/// it exits once `shutdown` is set. The handle is returned so callers can
/// join it.
pub fn build_router(
    state: Arc<AppState>,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<(Router, std::thread::JoinHandle<()>)> {
    let config = &state.config;

    let mut builder = GovernorConfigBuilder::default().key_extractor(SmartIpKeyExtractor);
    builder.per_second(config.rate_limit.functions_per_second.max(1).into());
    builder.burst_size(config.rate_limit.functions_burst.max(1));
    builder.error_handler(rate_limited_response);
    let functions_gov_conf = Arc::new(
        builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build functions governor config"))?,
    );

    let limiter_cleaner = {
        let limiter = functions_gov_conf.limiter().clone();
        let interval = Duration::from_secs(60);
        std::thread::spawn(move || {
            // Short ticks so shutdown is noticed quickly.
            let tick = Duration::from_secs(1);
            loop {
                for _ in 0..interval.as_secs() {
                    if shutdown.load(Ordering::SeqCst) {
                        tracing::info!("Functions rate limiter cleanup thread exiting");
                        return;
                    }
                    std::thread::sleep(tick);
                }
                tracing::debug!("functions rate limiter size: {}", limiter.len());
                limiter.retain_recent();
            }
        })
    };

    let functions_rate_layer = GovernorLayer {
        config: functions_gov_conf,
    };

    let origin = config
        .server
        .frontend_url
        .parse::<HeaderValue>()
        .map_err(|e| anyhow::anyhow!("Invalid FRONTEND_URL for CORS: {}", e))?;

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .nest(
            "/api/functions",
            routes::functions::router().layer(functions_rate_layer),
        )
        .nest("/api/connections", routes::connections::router())
        .nest("/api/events", routes::events::events_router())
        .nest("/api/assignments", routes::events::assignments_router())
        .nest("/api/tasks", routes::tasks::router())
        .nest("/api/profile", routes::profile::profile_router())
        .nest("/api/people", routes::profile::people_router())
        .nest("/api/posts", routes::posts::router())
        .nest("/api/messages", routes::messages::router())
        .nest("/api/settings", routes::settings::router())
        .with_state(state)
        .layer(axum::middleware::from_fn(
            middleware::security_headers::security_headers,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([
                    http::Method::GET,
                    http::Method::POST,
                    http::Method::PUT,
                    http::Method::DELETE,
                    http::Method::OPTIONS,
                ])
                .allow_headers([
                    http::header::CONTENT_TYPE,
                    http::header::AUTHORIZATION,
                    http::header::ACCEPT,
                    http::HeaderName::from_static(routes::functions::CRON_SECRET_HEADER),
                ])
                .allow_credentials(true),
        );

    Ok((app, limiter_cleaner))
}
