mod common;

use studyhub::db::models::{EventType, Provider, UpsertCalendarConnection};
use studyhub::db::repository::connection::{SYNC_STATUS_FAILED, SYNC_STATUS_SUCCESS};
use studyhub::db::{ConnectionRepository, EventRepository, SettingsRepository};
use studyhub::error::AppError;
use studyhub::services::calendar::CalendarSyncManager;
use studyhub::services::canvas;

async fn canvas_connection(
    state: &std::sync::Arc<studyhub::AppState>,
    user_id: &str,
    feed_url: String,
) -> studyhub::db::models::CalendarConnection {
    ConnectionRepository::upsert(
        &state.db,
        user_id,
        Provider::Canvas,
        UpsertCalendarConnection {
            feed_url: Some(feed_url),
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn feed_is_fetched_parsed_and_stored() {
    let mut server = mockito::Server::new_async().await;
    let feed = server
        .mock("GET", "/feeds/calendars/user_abc123.ics")
        .with_status(200)
        .with_header("content-type", "text/calendar")
        .with_body(common::CANVAS_FEED)
        .expect(2)
        .create_async()
        .await;

    let state = common::test_state(None).await;
    let conn = canvas_connection(
        &state,
        "u1",
        format!("{}/feeds/calendars/user_abc123.ics", server.url()),
    )
    .await;

    let first = CalendarSyncManager::sync_ics_connection(&state, &conn)
        .await
        .unwrap();
    assert_eq!(first.processed, 3);
    assert_eq!(first.new, 3);

    let second = CalendarSyncManager::sync_ics_connection(&state, &conn)
        .await
        .unwrap();
    assert_eq!((second.new, second.updated, second.deleted), (0, 0, 0));
    feed.assert_async().await;

    let stored = EventRepository::find_by_user_provider(&state.db, "u1", Provider::Canvas)
        .await
        .unwrap();
    assert_eq!(stored.len(), 3);
    let essay = stored
        .iter()
        .find(|e| e.source_event_id == "event-assignment-101")
        .unwrap();
    assert_eq!(essay.event_type(), EventType::Assignment);
    assert_eq!(essay.start_time.to_string(), "2024-12-01 14:00:00");

    let conn = ConnectionRepository::find_by_id(&state.db, &conn.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conn.last_sync_status.as_deref(), Some(SYNC_STATUS_SUCCESS));
    assert!(conn.last_synced_at.is_some());
}

#[tokio::test]
async fn failing_feed_marks_connection_and_keeps_events() {
    let mut server = mockito::Server::new_async().await;
    let ok = server
        .mock("GET", "/feed.ics")
        .with_status(200)
        .with_body(common::CANVAS_FEED)
        .expect(1)
        .create_async()
        .await;

    let state = common::test_state(None).await;
    let conn = canvas_connection(&state, "u1", format!("{}/feed.ics", server.url())).await;
    CalendarSyncManager::sync_ics_connection(&state, &conn)
        .await
        .unwrap();
    ok.assert_async().await;

    let _gone = server
        .mock("GET", "/gone.ics")
        .with_status(404)
        .with_body("not found")
        .create_async()
        .await;
    let conn = canvas_connection(&state, "u1", format!("{}/gone.ics", server.url())).await;

    let err = CalendarSyncManager::sync_ics_connection(&state, &conn)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Upstream(_)));

    let conn = ConnectionRepository::find_by_id(&state.db, &conn.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conn.last_sync_status.as_deref(), Some(SYNC_STATUS_FAILED));
    assert!(conn.last_sync_error.is_some());

    // A failed fetch never wipes what was already imported.
    let stored = EventRepository::find_by_user_provider(&state.db, "u1", Provider::Canvas)
        .await
        .unwrap();
    assert_eq!(stored.len(), 3);
}

#[tokio::test]
async fn batch_sync_continues_past_a_broken_connection() {
    let mut server = mockito::Server::new_async().await;
    let _good = server
        .mock("GET", "/good.ics")
        .with_status(200)
        .with_body(common::CANVAS_FEED)
        .create_async()
        .await;
    let _bad = server
        .mock("GET", "/bad.ics")
        .with_status(403)
        .create_async()
        .await;

    let state = common::test_state(None).await;
    canvas_connection(&state, "u1", format!("{}/good.ics", server.url())).await;
    canvas_connection(&state, "u2", format!("{}/bad.ics", server.url())).await;

    let summary = CalendarSyncManager::sync_all(&state, Provider::Canvas)
        .await
        .unwrap();
    assert_eq!(summary.connections_processed, 2);
    assert_eq!(summary.successful_syncs, 1);
    assert_eq!(summary.total_events_processed, 3);
}

#[tokio::test]
async fn course_colours_are_assigned_once() {
    let mut server = mockito::Server::new_async().await;
    let _feed = server
        .mock("GET", "/feed.ics")
        .with_status(200)
        .with_body(common::CANVAS_FEED)
        .create_async()
        .await;

    let state = common::test_state(None).await;
    let url = format!("{}/feed.ics", server.url());

    let colors = canvas::sync_course_colors(&state, "u1", &url).await.unwrap();
    assert_eq!(colors.len(), 2);
    assert!(colors.contains_key("ENGL 101"));
    assert!(colors.contains_key("MATH 221"));

    let again = canvas::sync_course_colors(&state, "u1", &url).await.unwrap();
    assert_eq!(again, colors);

    let settings = SettingsRepository::get(&state.db, "u1").await.unwrap();
    assert_eq!(settings.course_colors, colors);
}
