//! Google Calendar and Google Tasks import.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GoogleConfig;
use crate::db::models::{CalendarConnection, CalendarEvent, EventType, Provider, TaskDraft};
use crate::db::{ConnectionRepository, TaskRepository};
use crate::error::{AppError, AppResult};
use crate::scoring::priority_for;
use crate::services::calendar::CalendarSyncManager;
use crate::services::http::{send_with_backoff, truncate, RetryPolicy};
use crate::AppState;

const RECONNECT_MESSAGE: &str =
    "Google access has expired. Please reconnect your Google account in Settings.";
const EVENTS_LOOKBACK_DAYS: i64 = 30;
const PAGE_SIZE: &str = "250";
/// Upper bound on pages followed per listing.
const MAX_PAGES: usize = 20;

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventDateTime {
    pub date: Option<String>,
    #[serde(rename = "dateTime")]
    pub date_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleEvent {
    pub id: String,
    pub status: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub start: EventDateTime,
    #[serde(default)]
    pub end: EventDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleTask {
    pub id: String,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub due: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// A call that either worked or was refused with 401.
pub enum Fetched<T> {
    Ok(T),
    Unauthorized,
}

/// Counts returned by `/api/functions/google-sync`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleSyncReport {
    pub synced_events: usize,
    pub synced_tasks: usize,
    pub errors: usize,
    pub total_events: usize,
    pub total_tasks: usize,
}

/// Absolute expiry for a token lifetime given in seconds. `None` when the
/// lifetime does not fit a timestamp.
pub fn token_expiry(now: DateTime<Utc>, expires_in: i64) -> Option<NaiveDateTime> {
    Duration::try_seconds(expires_in)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .map(|at| at.naive_utc())
}

fn parse_event_time(value: &EventDateTime) -> Option<DateTime<Utc>> {
    if let Some(dt) = value.date_time.as_deref() {
        return DateTime::parse_from_rfc3339(dt)
            .ok()
            .map(|d| d.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value.date.as_deref()?, "%Y-%m-%d").ok()?;
    Some(date.and_time(NaiveTime::MIN).and_utc())
}

/// Map a Google event to a feed event. Cancelled, untitled and undated events
/// are dropped.
pub fn to_calendar_event(event: GoogleEvent) -> Option<CalendarEvent> {
    if event.status.as_deref() == Some("cancelled") {
        return None;
    }
    let title = event
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())?
        .to_string();
    let start = parse_event_time(&event.start)?;
    let end = parse_event_time(&event.end)
        .filter(|end| *end >= start)
        .unwrap_or(start);

    let event_type = EventType::classify(&title, &[], None);
    Some(CalendarEvent {
        title,
        description: event.description,
        start_time: start,
        end_time: end,
        location: event.location,
        event_type,
        source_provider: Provider::Google,
        source_event_id: event.id,
        date_fallback: false,
    })
}

/// Map a Google task to a task draft with a freshly computed priority.
pub fn to_task_draft(task: GoogleTask, now: DateTime<Utc>) -> Option<TaskDraft> {
    if task.deleted {
        return None;
    }
    let title = task
        .title
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())?
        .to_string();
    let due = task
        .due
        .as_deref()
        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        .map(|d| d.with_timezone(&Utc));
    let notes = task.notes.filter(|n| !n.trim().is_empty());

    Some(TaskDraft {
        priority: priority_for(&title, notes.as_deref(), due, now),
        title,
        description: notes,
        due_date: due.map(|d| d.naive_utc()),
        completed: task.status.as_deref() == Some("completed"),
        source_provider: Some(Provider::Google.as_str().to_string()),
        source_task_id: Some(task.id),
    })
}

/// Thin client over the Google token, Calendar and Tasks endpoints.
#[derive(Clone)]
pub struct GoogleService {
    client: reqwest::Client,
    config: GoogleConfig,
    retry: RetryPolicy,
}

impl GoogleService {
    pub fn new(client: reqwest::Client, config: GoogleConfig) -> Self {
        Self {
            client,
            config,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Exchange a refresh token for a new access token. A refused grant means
    /// the user has to reconnect.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> AppResult<TokenResponse> {
        let (Some(client_id), Some(client_secret)) =
            (&self.config.client_id, &self.config.client_secret)
        else {
            return Err(AppError::ServiceUnavailable(
                "Google OAuth client is not configured".to_string(),
            ));
        };

        let params = [
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let resp = send_with_backoff(self.retry, "Google OAuth", || {
            self.client.post(&self.config.token_url).form(&params)
        })
        .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED
        {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!("Google refused token refresh: {}", truncate(&body, 200));
            return Err(AppError::ReconnectRequired(RECONNECT_MESSAGE.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "Google token refresh failed ({}): {}",
                status,
                truncate(&body, 200)
            )));
        }

        Ok(resp.json().await?)
    }

    async fn list_pages<T>(
        &self,
        token: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> AppResult<Fetched<Vec<T>>>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let resp = send_with_backoff(self.retry, "Google API", || {
                let mut req = self.client.get(url).bearer_auth(token).query(query);
                if let Some(pt) = &page_token {
                    req = req.query(&[("pageToken", pt)]);
                }
                req
            })
            .await?;

            let status = resp.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Ok(Fetched::Unauthorized);
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(AppError::Upstream(format!(
                    "Google API answered {}: {}",
                    status,
                    truncate(&body, 200)
                )));
            }

            let page: Page<T> = resp.json().await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => return Ok(Fetched::Ok(items)),
            }
        }

        tracing::warn!("Stopped following Google pages after {}", MAX_PAGES);
        Ok(Fetched::Ok(items))
    }

    /// Primary-calendar events starting from `time_min`, recurring events expanded.
    pub async fn fetch_events(
        &self,
        token: &str,
        time_min: DateTime<Utc>,
    ) -> AppResult<Fetched<Vec<GoogleEvent>>> {
        let url = format!("{}/calendars/primary/events", self.config.calendar_api_url);
        let query = [
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
            ("maxResults", PAGE_SIZE.to_string()),
            ("timeMin", time_min.to_rfc3339()),
        ];
        self.list_pages(token, &url, &query).await
    }

    /// Tasks of the default list, completed ones included.
    pub async fn fetch_tasks(&self, token: &str) -> AppResult<Fetched<Vec<GoogleTask>>> {
        let url = format!("{}/lists/@default/tasks", self.config.tasks_api_url);
        let query = [
            ("showCompleted", "true".to_string()),
            ("showHidden", "true".to_string()),
            ("maxResults", "100".to_string()),
        ];
        self.list_pages(token, &url, &query).await
    }
}

/// Refresh the connection's token and persist the result.
async fn refresh_and_store(
    state: &Arc<AppState>,
    connection: &CalendarConnection,
) -> AppResult<String> {
    let refresh_token = connection
        .refresh_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::ReconnectRequired(RECONNECT_MESSAGE.to_string()))?;

    let token = state.google.refresh_access_token(refresh_token).await?;
    let expires_at = token.expires_in.and_then(|secs| {
        let at = token_expiry(Utc::now(), secs);
        if at.is_none() {
            tracing::warn!("Ignoring out-of-range token lifetime {}s from Google", secs);
        }
        at
    });

    ConnectionRepository::update_tokens(
        &state.db,
        &connection.id,
        &token.access_token,
        token.refresh_token.as_deref(),
        expires_at,
    )
    .await?;
    tracing::info!("Refreshed Google token for connection {}", connection.id);

    Ok(token.access_token)
}

/// Run `call` with the current token; on 401 refresh once and retry.
async fn with_token_retry<T, F, Fut>(
    state: &Arc<AppState>,
    connection: &CalendarConnection,
    token: &mut String,
    refreshed: &mut bool,
    call: F,
) -> AppResult<T>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = AppResult<Fetched<T>>>,
{
    if let Fetched::Ok(value) = call(token.clone()).await? {
        return Ok(value);
    }
    if *refreshed {
        return Err(AppError::ReconnectRequired(RECONNECT_MESSAGE.to_string()));
    }

    tracing::warn!(
        "Google rejected the token for connection {}; refreshing",
        connection.id
    );
    *token = refresh_and_store(state, connection).await?;
    *refreshed = true;

    match call(token.clone()).await? {
        Fetched::Ok(value) => Ok(value),
        Fetched::Unauthorized => Err(AppError::ReconnectRequired(RECONNECT_MESSAGE.to_string())),
    }
}

/// Import the user's Google calendar events and tasks for `connection_id`.
pub async fn sync_connection(
    state: &Arc<AppState>,
    user_id: &str,
    connection_id: &str,
    access_token: Option<String>,
) -> AppResult<GoogleSyncReport> {
    let connection = ConnectionRepository::find_by_id(&state.db, connection_id)
        .await?
        .filter(|c| c.user_id == user_id)
        .ok_or_else(|| AppError::NotFound(format!("Connection {} not found", connection_id)))?;
    if connection.provider() != Some(Provider::Google) {
        return Err(AppError::BadRequest(
            "Connection is not a Google connection".to_string(),
        ));
    }

    let _guard = state.sync_locks.acquire(user_id, Provider::Google).await;

    let outcome = run_sync(state, &connection, access_token).await;

    let error_text = outcome.as_ref().err().map(|e| e.to_string());
    if let Err(e) =
        ConnectionRepository::record_sync(&state.db, &connection.id, error_text.as_deref()).await
    {
        tracing::warn!(
            "Failed to record sync status for connection {}: {:?}",
            connection.id,
            e
        );
    }
    outcome
}

async fn run_sync(
    state: &Arc<AppState>,
    connection: &CalendarConnection,
    access_token: Option<String>,
) -> AppResult<GoogleSyncReport> {
    let mut refreshed = false;
    let mut token = match access_token
        .filter(|t| !t.is_empty())
        .or_else(|| connection.access_token.clone().filter(|t| !t.is_empty()))
    {
        Some(t) => t,
        None => {
            refreshed = true;
            refresh_and_store(state, connection).await?
        }
    };

    let now = Utc::now();
    let time_min = now - Duration::days(EVENTS_LOOKBACK_DAYS);
    let google = &state.google;

    let raw_events = with_token_retry(state, connection, &mut token, &mut refreshed, |t| async move {
        google.fetch_events(&t, time_min).await
    })
    .await?;
    let raw_tasks = with_token_retry(state, connection, &mut token, &mut refreshed, |t| async move {
        google.fetch_tasks(&t).await
    })
    .await?;

    let events: Vec<CalendarEvent> = raw_events.into_iter().filter_map(to_calendar_event).collect();
    let result =
        CalendarSyncManager::apply(&state.db, &connection.user_id, Provider::Google, events).await?;

    let drafts: Vec<TaskDraft> = raw_tasks
        .into_iter()
        .filter_map(|t| to_task_draft(t, now))
        .collect();
    let mut report = GoogleSyncReport {
        synced_events: result.new + result.updated,
        errors: result.errors,
        total_events: result.processed,
        total_tasks: drafts.len(),
        ..Default::default()
    };

    for draft in &drafts {
        match TaskRepository::upsert_imported(&state.db, &connection.user_id, draft).await {
            Ok(_) => report.synced_tasks += 1,
            Err(e) => {
                tracing::warn!(
                    "Failed to import Google task {:?} for user {}: {:?}",
                    draft.source_task_id,
                    connection.user_id,
                    e
                );
                report.errors += 1;
            }
        }
    }

    tracing::info!(
        "Google sync for user {}: {} events ({} changed), {} tasks, {} errors",
        connection.user_id,
        report.total_events,
        report.synced_events,
        report.synced_tasks,
        report.errors
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::scoring::Priority;

    fn event(json: serde_json::Value) -> GoogleEvent {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn all_day_events_start_at_midnight_utc() {
        let e = to_calendar_event(event(serde_json::json!({
            "id": "a1",
            "summary": "Reading day",
            "start": {"date": "2024-12-05"},
            "end": {"date": "2024-12-06"}
        })))
        .unwrap();
        assert_eq!(e.start_time, Utc.with_ymd_and_hms(2024, 12, 5, 0, 0, 0).unwrap());
        assert_eq!(e.end_time, Utc.with_ymd_and_hms(2024, 12, 6, 0, 0, 0).unwrap());
        assert_eq!(e.source_provider, Provider::Google);
    }

    #[test]
    fn timed_events_keep_their_offset() {
        let e = to_calendar_event(event(serde_json::json!({
            "id": "b2",
            "summary": "Chem Midterm",
            "start": {"dateTime": "2024-12-05T09:00:00-05:00"},
            "end": {"dateTime": "2024-12-05T10:30:00-05:00"}
        })))
        .unwrap();
        assert_eq!(e.start_time, Utc.with_ymd_and_hms(2024, 12, 5, 14, 0, 0).unwrap());
        assert_eq!(e.event_type, EventType::Exam);
    }

    #[test]
    fn cancelled_and_untitled_events_are_dropped() {
        assert!(to_calendar_event(event(serde_json::json!({
            "id": "c", "status": "cancelled", "summary": "Gone",
            "start": {"date": "2024-12-05"}
        })))
        .is_none());
        assert!(to_calendar_event(event(serde_json::json!({
            "id": "d", "summary": "  ",
            "start": {"date": "2024-12-05"}
        })))
        .is_none());
    }

    #[test]
    fn tasks_get_priority_and_completion() {
        let now = Utc.with_ymd_and_hms(2024, 12, 1, 12, 0, 0).unwrap();
        let task: GoogleTask = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "title": "Final exam prep",
            "due": "2024-12-02T00:00:00.000Z",
            "status": "completed"
        }))
        .unwrap();
        let draft = to_task_draft(task, now).unwrap();
        assert_eq!(draft.priority, Priority::High);
        assert!(draft.completed);
        assert_eq!(draft.source_provider.as_deref(), Some("google"));
        assert_eq!(draft.source_task_id.as_deref(), Some("t1"));
    }

    #[test]
    fn token_expiry_rejects_lifetimes_past_the_calendar() {
        let now = Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap();
        assert_eq!(
            token_expiry(now, 3600),
            Some(Utc.with_ymd_and_hms(2024, 12, 1, 1, 0, 0).unwrap().naive_utc())
        );
        assert_eq!(token_expiry(now, i64::MAX), None);
        assert_eq!(token_expiry(now, i64::MAX / 1000 - 1), None);
    }
}
