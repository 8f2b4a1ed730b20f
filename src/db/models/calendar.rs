use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Providers and event kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Canvas,
    Google,
    Apple,
    Manual,
}

impl Provider {
    /// Convert from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "canvas" => Some(Provider::Canvas),
            "google" => Some(Provider::Google),
            "apple" => Some(Provider::Apple),
            "manual" => Some(Provider::Manual),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Canvas => "canvas",
            Provider::Google => "google",
            Provider::Apple => "apple",
            Provider::Manual => "manual",
        }
    }

    /// Providers whose connection is a plain ICS feed URL.
    pub fn is_ics_feed(self) -> bool {
        matches!(self, Provider::Canvas | Provider::Apple)
    }
}

impl TryFrom<&str> for Provider {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value).ok_or_else(|| format!("Invalid provider: {}", value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Assignment,
    Exam,
    Class,
    Event,
}

const EXAM_WORDS: &[&str] = &["exam", "midterm", "final", "finals"];
const ASSIGNMENT_WORDS: &[&str] = &[
    "assignment",
    "homework",
    "hw",
    "quiz",
    "due",
    "project",
    "essay",
    "paper",
    "worksheet",
    "problem",
    "discussion",
];
const CLASS_WORDS: &[&str] = &["lecture", "class", "seminar", "recitation", "lab", "tutorial"];

impl EventType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "assignment" => Some(EventType::Assignment),
            "exam" => Some(EventType::Exam),
            "class" => Some(EventType::Class),
            "event" => Some(EventType::Event),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Assignment => "assignment",
            EventType::Exam => "exam",
            EventType::Class => "class",
            EventType::Event => "event",
        }
    }

    /// Guess the kind of an event from its title, CATEGORIES values and UID.
    ///
    /// Canvas prefixes assignment UIDs with `event-assignment-`.
    pub fn classify(title: &str, categories: &[String], uid: Option<&str>) -> Self {
        let words: Vec<String> = title
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .chain(categories.iter().map(|c| c.trim().to_lowercase()))
            .collect();
        let has = |vocab: &[&str]| words.iter().any(|w| vocab.contains(&w.as_str()));

        if has(EXAM_WORDS) {
            EventType::Exam
        } else if uid.is_some_and(|u| u.starts_with("event-assignment-")) || has(ASSIGNMENT_WORDS)
        {
            EventType::Assignment
        } else if has(CLASS_WORDS) {
            EventType::Class
        } else {
            EventType::Event
        }
    }

    pub fn is_assignment_like(self) -> bool {
        matches!(self, EventType::Assignment | EventType::Exam)
    }
}

// ============================================================================
// Calendar events
// ============================================================================

/// An event as read from a provider feed, before reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: Option<String>,
    pub event_type: EventType,
    pub source_provider: Provider,
    pub source_event_id: String,
    /// Set when a default was substituted for a missing or unparseable date.
    #[serde(default)]
    pub date_fallback: bool,
}

/// Row of the `events` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: String,
    pub user_id: String,
    pub source_provider: String,
    pub source_event_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub location: Option<String>,
    pub event_type: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl StoredEvent {
    pub fn event_type(&self) -> EventType {
        EventType::from_str(&self.event_type).unwrap_or(EventType::Event)
    }

    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start_time.and_utc()
    }

    pub fn end_utc(&self) -> DateTime<Utc> {
        self.end_time.and_utc()
    }
}

// ============================================================================
// Calendar connections
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CalendarConnection {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub feed_url: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<NaiveDateTime>,
    pub sync_enabled: bool,
    pub last_synced_at: Option<NaiveDateTime>,
    pub last_sync_status: Option<String>,
    pub last_sync_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl CalendarConnection {
    pub fn provider(&self) -> Option<Provider> {
        Provider::from_str(&self.provider)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpsertCalendarConnection {
    pub feed_url: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<NaiveDateTime>,
    pub sync_enabled: Option<bool>,
}
