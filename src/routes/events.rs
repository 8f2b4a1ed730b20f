use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{EventType, StoredEvent};
use crate::db::{EventRepository, SettingsRepository, TaskRepository};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::services::assignments::{filter_assignments, Assignment, AssignmentFilter};
use crate::services::canvas::course_of;
use crate::timezone::{self, UsZone};
use crate::AppState;

const DEFAULT_RANGE_DAYS: i64 = 7;
const MAX_RANGE_DAYS: i64 = 366;

pub fn events_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_events))
}

pub fn assignments_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_assignments))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// First local day, `YYYY-MM-DD`. Defaults to today.
    pub from: Option<NaiveDate>,
    /// Last local day (inclusive).
    pub to: Option<NaiveDate>,
    /// Zone name; defaults to the user's setting.
    pub tz: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EventView {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub event_type: EventType,
    pub source_provider: String,
    pub course: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub local_start: NaiveDateTime,
    pub local_end: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub timezone: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub events: Vec<EventView>,
}

fn view(event: StoredEvent, zone: &UsZone) -> EventView {
    let start = event.start_utc();
    let end = event.end_utc();
    EventView {
        course: course_of(&event.title),
        event_type: event.event_type(),
        id: event.id,
        title: event.title,
        description: event.description,
        location: event.location,
        source_provider: event.source_provider,
        start_time: start.to_rfc3339(),
        end_time: end.to_rfc3339(),
        local_start: zone.to_local(start),
        local_end: zone.to_local(end),
    }
}

async fn resolve_zone(state: &AppState, user_id: &str, requested: Option<&str>) -> AppResult<UsZone> {
    let name = match requested {
        Some(name) => name.to_string(),
        None => SettingsRepository::get(&state.db, user_id).await?.timezone,
    };
    timezone::lookup(&name)
        .ok_or_else(|| AppError::Validation(format!("Unknown timezone: {}", name)))
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Query(query): Query<EventsQuery>,
) -> AppResult<Json<EventsResponse>> {
    let zone = resolve_zone(&state, &session.user_id, query.tz.as_deref()).await?;

    let today = zone.to_local(Utc::now()).date();
    let from = query.from.unwrap_or(today);
    let to = query
        .to
        .unwrap_or(from + Duration::days(DEFAULT_RANGE_DAYS - 1));
    if to < from {
        return Err(AppError::Validation("`to` is before `from`".to_string()));
    }
    if (to - from).num_days() > MAX_RANGE_DAYS {
        return Err(AppError::Validation(format!(
            "Range is longer than {} days",
            MAX_RANGE_DAYS
        )));
    }

    let start_utc = zone.to_utc(from.and_time(NaiveTime::MIN));
    let end_utc = zone.to_utc((to + Duration::days(1)).and_time(NaiveTime::MIN));

    let events = EventRepository::list_in_range(
        &state.db,
        &session.user_id,
        start_utc.naive_utc(),
        end_utc.naive_utc(),
    )
    .await?;

    Ok(Json(EventsResponse {
        timezone: zone.name.to_string(),
        from,
        to,
        events: events.into_iter().map(|e| view(e, &zone)).collect(),
    }))
}

async fn list_assignments(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Query(mut filter): Query<AssignmentFilter>,
) -> AppResult<Json<Vec<Assignment>>> {
    let events = EventRepository::list_assignment_like(&state.db, &session.user_id).await?;
    filter.exclude_event_ids = TaskRepository::converted_event_ids(&state.db, &session.user_id)
        .await?
        .into_iter()
        .collect::<HashSet<_>>();

    Ok(Json(filter_assignments(&events, &filter, Utc::now())?))
}
