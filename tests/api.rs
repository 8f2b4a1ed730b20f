mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use studyhub::db::models::{CalendarEvent, EventType, Provider};
use studyhub::db::EventRepository;
use studyhub::services::calendar::CalendarSyncManager;
use studyhub::{build_router, AppState};

fn app(state: Arc<AppState>) -> Router {
    let (router, _cleaner) =
        build_router(state, Arc::new(AtomicBool::new(true))).expect("build router");
    router
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.7");
    if let Some(user) = user {
        builder = builder.header("authorization", common::bearer(user));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_database_and_sets_security_headers() {
    let app = app(common::test_state(None).await);
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert!(response.headers().contains_key("content-security-policy"));

    let (_, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "ok");
}

#[tokio::test]
async fn resources_require_a_bearer_token() {
    let app = app(common::test_state(None).await);
    let (status, body) = send(&app, "GET", "/api/tasks", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let mut request = Request::builder()
        .uri("/api/tasks")
        .header("authorization", "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    request
        .headers_mut()
        .insert("x-forwarded-for", "203.0.113.7".parse().unwrap());
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn batch_toggle_is_undone_when_one_task_is_missing() {
    let app = app(common::test_state(None).await);

    let (status, first) = send(
        &app,
        "POST",
        "/api/tasks",
        Some("u1"),
        Some(json!({"title": "Read chapter 3"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, second) = send(
        &app,
        "POST",
        "/api/tasks",
        Some("u1"),
        Some(json!({"title": "Urgent: midterm essay"})),
    )
    .await;
    assert_eq!(second["priority"], 3);

    let ids = json!([first["id"], second["id"], "missing-task"]);
    let (status, _) = send(
        &app,
        "POST",
        "/api/tasks/toggle",
        Some("u1"),
        Some(json!({"task_ids": ids})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, tasks) = send(&app, "GET", "/api/tasks", Some("u1"), None).await;
    let tasks = tasks.as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t["completed"] == false));
    assert!(tasks.iter().all(|t| t["completed_at"].is_null()));

    // The same batch without the missing id goes through.
    let ids = json!([first["id"], second["id"]]);
    let (status, toggled) = send(
        &app,
        "POST",
        "/api/tasks/toggle",
        Some("u1"),
        Some(json!({"task_ids": ids})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(toggled
        .as_array()
        .unwrap()
        .iter()
        .all(|t| t["completed"] == true));

    // Another user cannot see or toggle them.
    let uri = format!("/api/tasks/{}/toggle", first["id"].as_str().unwrap());
    let (status, _) = send(&app, "POST", &uri, Some("u2"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn promoted_post_takes_the_fourth_feed_slot() {
    let app = app(common::test_state(None).await);

    let (status, promoted) = send(
        &app,
        "POST",
        "/api/posts",
        Some("author"),
        Some(json!({"content": "Join the robotics club!"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    for i in 0..4 {
        send(
            &app,
            "POST",
            "/api/posts",
            Some("other"),
            Some(json!({"content": format!("organic {}", i)})),
        )
        .await;
    }

    // Only the author may promote.
    let request = json!({
        "postId": promoted["id"],
        "budget": 20.0,
        "durationDays": 5,
        "skipPayment": true
    });
    let (status, _) = send(
        &app,
        "POST",
        "/api/functions/create-promotion",
        Some("other"),
        Some(request.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = send(
        &app,
        "POST",
        "/api/functions/create-promotion",
        Some("author"),
        Some(request),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["priorityScore"], 40);
    assert_eq!(created["status"], "active");

    let (_, feed) = send(&app, "GET", "/api/posts", Some("reader"), None).await;
    let feed = feed.as_array().unwrap();
    assert_eq!(feed.len(), 5);
    assert_eq!(feed[3]["id"], promoted["id"]);
    assert_eq!(feed[3]["promoted"], true);
    assert_eq!(
        feed.iter().filter(|item| item["id"] == promoted["id"]).count(),
        1
    );
}

#[tokio::test]
async fn unpaid_promotion_has_no_score() {
    let app = app(common::test_state(None).await);
    let (_, post) = send(
        &app,
        "POST",
        "/api/posts",
        Some("author"),
        Some(json!({"content": "Bake sale Friday"})),
    )
    .await;

    let (status, created) = send(
        &app,
        "POST",
        "/api/functions/create-promotion",
        Some("author"),
        Some(json!({"postId": post["id"], "budget": 5.0, "durationDays": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["status"], "pending_payment");
    assert!(created.get("priorityScore").is_none());

    let (status, _) = send(
        &app,
        "POST",
        "/api/functions/create-promotion",
        Some("author"),
        Some(json!({"postId": post["id"], "budget": 5.0, "durationDays": 45})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn cron_sync_rejects_a_wrong_secret() {
    let app = app(common::test_state(None).await);
    let request = Request::builder()
        .method("POST")
        .uri("/api/functions/canvas-sync")
        .header("x-forwarded-for", "203.0.113.7")
        .header("x-cron-secret", "guess")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let request = Request::builder()
        .method("POST")
        .uri("/api/functions/canvas-sync")
        .header("x-forwarded-for", "203.0.113.7")
        .header("x-cron-secret", common::CRON_SECRET)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, summary) = send(&app, "POST", "/api/functions/canvas-sync", Some("u1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["connections_processed"], 0);
}

#[tokio::test]
async fn converted_assignments_drop_out_of_the_planner() {
    let state = common::test_state(None).await;
    let soon = Utc::now() + Duration::days(2);
    let event = |uid: &str, title: &str| CalendarEvent {
        title: title.to_string(),
        description: None,
        start_time: soon,
        end_time: soon,
        location: None,
        event_type: EventType::Assignment,
        source_provider: Provider::Canvas,
        source_event_id: uid.to_string(),
        date_fallback: false,
    };
    CalendarSyncManager::apply(
        &state.db,
        "u1",
        Provider::Canvas,
        vec![
            event("event-assignment-1", "Essay 2 [ENGL 101]"),
            event("event-assignment-2", "Lab 4 [CHEM 110]"),
        ],
    )
    .await
    .unwrap();
    let stored = EventRepository::find_by_user_provider(&state.db, "u1", Provider::Canvas)
        .await
        .unwrap();
    let essay = stored
        .iter()
        .find(|e| e.source_event_id == "event-assignment-1")
        .unwrap();

    let app = app(state.clone());
    let (_, before) = send(&app, "GET", "/api/assignments", Some("u1"), None).await;
    assert_eq!(before.as_array().unwrap().len(), 2);

    let uri = format!("/api/tasks/from-event/{}", essay.id);
    let (status, task) = send(&app, "POST", &uri, Some("u1"), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(task["source_provider"], "event");
    let (status, _) = send(&app, "POST", &uri, Some("u1"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, after) =
        send(&app, "GET", "/api/assignments?course=chem%20110", Some("u1"), None).await;
    let after = after.as_array().unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0]["course"], "CHEM 110");
}

#[tokio::test]
async fn events_are_returned_in_local_time() {
    let state = common::test_state(None).await;
    let start = Utc.with_ymd_and_hms(2024, 12, 1, 14, 0, 0).unwrap();
    CalendarSyncManager::apply(
        &state.db,
        "u1",
        Provider::Apple,
        vec![CalendarEvent {
            title: "Office hours".to_string(),
            description: None,
            start_time: start,
            end_time: start + Duration::hours(1),
            location: Some("Room 204".to_string()),
            event_type: EventType::Event,
            source_provider: Provider::Apple,
            source_event_id: "apple-1".to_string(),
            date_fallback: false,
        }],
    )
    .await
    .unwrap();

    let app = app(state);
    let (status, body) = send(
        &app,
        "GET",
        "/api/events?from=2024-12-01&to=2024-12-01&tz=America/Chicago",
        Some("u1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["timezone"], "America/Chicago");
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["local_start"], "2024-12-01T08:00:00");

    let (status, _) = send(
        &app,
        "GET",
        "/api/events?from=2024-12-02&to=2024-12-01",
        Some("u1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn settings_reject_unknown_zones() {
    let app = app(common::test_state(None).await);
    let (status, settings) = send(&app, "GET", "/api/settings", Some("u1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["timezone"], "America/New_York");

    let (status, _) = send(
        &app,
        "PUT",
        "/api/settings",
        Some("u1"),
        Some(json!({"timezone": "Mars/Olympus"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, saved) = send(
        &app,
        "PUT",
        "/api/settings",
        Some("u1"),
        Some(json!({"timezone": "America/Los_Angeles", "auto_sync_enabled": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["timezone"], "America/Los_Angeles");
    assert_eq!(saved["auto_sync_enabled"], false);
}

#[tokio::test]
async fn suggestions_rank_shared_facets() {
    let app = app(common::test_state(None).await);
    let profiles = [
        ("me", json!({"display_name": "Me", "school": "State U", "interests": ["chess", "climbing"]})),
        ("ann", json!({"display_name": "Ann", "school": "State U", "interests": ["chess"]})),
        ("bob", json!({"display_name": "Bob", "interests": ["chess"]})),
        ("cal", json!({"display_name": "Cal", "interests": ["golf"]})),
    ];
    for (user, body) in profiles {
        let (status, _) = send(&app, "PUT", "/api/profile", Some(user), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, ranked) = send(&app, "GET", "/api/people/suggested", Some("me"), None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = ranked
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["profile"]["user_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["ann", "bob"]);
    assert_eq!(ranked[0]["match_score"], 28);

    let (status, sent) = send(
        &app,
        "POST",
        "/api/messages",
        Some("me"),
        Some(json!({"recipient_id": "ann", "body": "Chess club on Friday?"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(sent["read_at"].is_null());

    let (_, thread) = send(&app, "GET", "/api/messages/me", Some("ann"), None).await;
    assert_eq!(thread.as_array().unwrap().len(), 1);
    let (_, thread) = send(&app, "GET", "/api/messages/me", Some("ann"), None).await;
    assert!(!thread[0]["read_at"].is_null());
}

#[tokio::test]
async fn out_of_range_windows_are_rejected_not_fatal() {
    let app = app(common::test_state(None).await);

    let (status, body) = send(
        &app,
        "GET",
        "/api/assignments?within_days=1000000000&include_past=true",
        Some("u1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = send(
        &app,
        "POST",
        "/api/connections",
        Some("u1"),
        Some(json!({
            "provider": "google",
            "access_token": "tok",
            "expires_in": i64::MAX
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, connection) = send(
        &app,
        "POST",
        "/api/connections",
        Some("u1"),
        Some(json!({"provider": "google", "access_token": "tok", "expires_in": 3600})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(connection["token_expires_at"].is_string());

    // The server is still answering.
    let (status, _) = send(&app, "GET", "/api/assignments", Some("u1"), None).await;
    assert_eq!(status, StatusCode::OK);
}
