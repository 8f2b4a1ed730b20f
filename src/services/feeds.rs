//! Fetching ICS feeds and describing what a feed contains.

use serde::Serialize;
use url::Url;

use crate::db::models::{EventType, Provider};
use crate::error::{AppError, AppResult};
use crate::ics::{self, ParsedFeed};
use crate::services::canvas;
use crate::services::http::{send_with_backoff, truncate, RetryPolicy};

/// Accept `http`, `https` and `webcal` feed URLs; `webcal` is fetched over https.
pub fn normalize_feed_url(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed)
        .map_err(|e| AppError::Validation(format!("Invalid feed URL: {}", e)))?;

    match url.scheme() {
        "http" | "https" => {}
        "webcal" | "webcals" => {
            url.set_scheme("https")
                .map_err(|_| AppError::Validation("Invalid feed URL".to_string()))?;
        }
        other => {
            return Err(AppError::Validation(format!(
                "Unsupported feed URL scheme: {}",
                other
            )))
        }
    }

    if url.host_str().is_none() {
        return Err(AppError::Validation("Feed URL has no host".to_string()));
    }
    Ok(url.to_string())
}

/// Mask the query string (Canvas puts the access token there) before logging.
pub fn redact_feed_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.query().is_some() {
                url.set_query(Some("redacted"));
            }
            let path = url.path().to_string();
            let segments: Vec<&str> = path.split('/').collect();
            if segments.len() > 2 {
                // Canvas feed paths end with a per-user secret.
                url.set_path(&format!("{}/redacted", segments[..segments.len() - 1].join("/")));
            }
            url.to_string()
        }
        Err(_) => "(unparseable url)".to_string(),
    }
}

#[derive(Clone)]
pub struct FeedClient {
    http: reqwest::Client,
    retry: RetryPolicy,
}

struct FetchedFeed {
    status: u16,
    content_type: Option<String>,
    body: String,
}

impl FeedClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn get(&self, url: &str) -> AppResult<FetchedFeed> {
        let resp = send_with_backoff(self.retry, "calendar feed", || {
            self.http
                .get(url)
                .header(reqwest::header::ACCEPT, "text/calendar, text/plain, */*")
        })
        .await?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = resp.text().await?;
        Ok(FetchedFeed {
            status,
            content_type,
            body,
        })
    }

    /// Download a feed body. Non-success statuses become [`AppError::Upstream`].
    pub async fn fetch_ics(&self, raw_url: &str) -> AppResult<String> {
        let url = normalize_feed_url(raw_url)?;
        let fetched = self.get(&url).await?;

        if !(200..300).contains(&fetched.status) {
            return Err(AppError::Upstream(format!(
                "Feed {} answered {}: {}",
                redact_feed_url(&url),
                fetched.status,
                truncate(&fetched.body, 200)
            )));
        }
        if !fetched.body.contains("BEGIN:VCALENDAR") {
            tracing::warn!(
                "Feed {} does not look like iCalendar ({:?})",
                redact_feed_url(&url),
                fetched.content_type
            );
        }
        Ok(fetched.body)
    }

    /// Fetch and parse a feed, reporting diagnostics instead of failing on a
    /// bad status.
    pub async fn diagnose(&self, raw_url: &str, provider: Provider) -> AppResult<FeedDiagnostics> {
        let url = normalize_feed_url(raw_url)?;
        let fetched = self.get(&url).await?;
        let parsed = ics::parse_ics(&fetched.body, provider);
        Ok(FeedDiagnostics::build(
            redact_feed_url(&url),
            fetched.status,
            fetched.content_type,
            &fetched.body,
            &parsed,
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct EventSample {
    pub title: String,
    pub start_time: String,
    pub end_time: String,
    pub event_type: EventType,
    pub source_event_id: String,
    pub date_fallback: bool,
}

/// What the debug endpoint reports about a feed.
#[derive(Debug, Serialize)]
pub struct FeedDiagnostics {
    pub url: String,
    pub http_status: u16,
    pub content_type: Option<String>,
    pub bytes: usize,
    pub lines: usize,
    pub looks_like_ics: bool,
    pub vevent_blocks: usize,
    pub parsed_events: usize,
    pub dropped_untitled: usize,
    pub synthetic_uids: usize,
    pub folded_lines: usize,
    pub date_fallbacks: usize,
    pub assignments: usize,
    pub exams: usize,
    pub courses: Vec<String>,
    pub sample_events: Vec<EventSample>,
    pub head: String,
}

const SAMPLE_EVENTS: usize = 5;
const HEAD_CHARS: usize = 500;

impl FeedDiagnostics {
    fn build(
        url: String,
        http_status: u16,
        content_type: Option<String>,
        body: &str,
        parsed: &ParsedFeed,
    ) -> Self {
        let count = |kind: EventType| parsed.events.iter().filter(|e| e.event_type == kind).count();

        Self {
            url,
            http_status,
            content_type,
            bytes: body.len(),
            lines: body.lines().count(),
            looks_like_ics: body.contains("BEGIN:VCALENDAR"),
            vevent_blocks: parsed.vevent_blocks,
            parsed_events: parsed.events.len(),
            dropped_untitled: parsed.dropped_untitled,
            synthetic_uids: parsed.synthetic_uids,
            folded_lines: parsed.folded_lines,
            date_fallbacks: parsed.date_fallbacks,
            assignments: count(EventType::Assignment),
            exams: count(EventType::Exam),
            courses: canvas::courses_in(&parsed.events),
            sample_events: parsed
                .events
                .iter()
                .take(SAMPLE_EVENTS)
                .map(|e| EventSample {
                    title: e.title.clone(),
                    start_time: e.start_time.to_rfc3339(),
                    end_time: e.end_time.to_rfc3339(),
                    event_type: e.event_type,
                    source_event_id: e.source_event_id.clone(),
                    date_fallback: e.date_fallback,
                })
                .collect(),
            head: truncate(body, HEAD_CHARS).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webcal_becomes_https() {
        assert_eq!(
            normalize_feed_url("webcal://canvas.example.edu/feeds/calendars/user_abc.ics").unwrap(),
            "https://canvas.example.edu/feeds/calendars/user_abc.ics"
        );
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(normalize_feed_url("ftp://example.com/a.ics").is_err());
        assert!(normalize_feed_url("not a url").is_err());
    }

    #[test]
    fn redaction_hides_secrets() {
        let redacted = redact_feed_url("https://canvas.example.edu/feeds/calendars/user_SECRET.ics?token=abc");
        assert!(!redacted.contains("SECRET"));
        assert!(!redacted.contains("abc"));
        assert!(redacted.starts_with("https://canvas.example.edu/feeds/calendars"));
    }
}
