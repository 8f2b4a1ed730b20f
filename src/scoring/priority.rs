//! Keyword and due-date based task priority.
//!
//! The score is a sum of non-negative parts (matched vocabulary weights plus a
//! due-date proximity bucket), so adding keywords or moving the due date closer
//! never lowers the resulting tier.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    None = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Priority {
    pub fn from_i64(value: i64) -> Self {
        match value {
            i64::MIN..=0 => Priority::None,
            1 => Priority::Low,
            2 => Priority::Medium,
            _ => Priority::High,
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }

    fn from_score(score: u32) -> Self {
        match score {
            0 => Priority::None,
            1..=2 => Priority::Low,
            3..=5 => Priority::Medium,
            _ => Priority::High,
        }
    }
}

const KEYWORDS: &[(&str, u32)] = &[
    ("exam", 3),
    ("final", 3),
    ("finals", 3),
    ("midterm", 3),
    ("urgent", 3),
    ("asap", 3),
    ("critical", 3),
    ("deadline", 2),
    ("important", 2),
    ("quiz", 2),
    ("test", 2),
    ("project", 2),
    ("presentation", 2),
    ("due", 1),
    ("essay", 1),
    ("paper", 1),
    ("assignment", 1),
    ("homework", 1),
    ("lab", 1),
    ("report", 1),
    ("reading", 1),
];

const PHRASES: &[(&str, u32)] = &[
    ("due today", 3),
    ("due tonight", 3),
    ("due tomorrow", 2),
    ("high priority", 3),
    ("final exam", 2),
];

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Points earned from vocabulary in `text`. Each keyword or phrase counts once.
pub fn keyword_points(text: &str) -> u32 {
    let tokens = words(text);
    let distinct: HashSet<&str> = tokens.iter().map(String::as_str).collect();
    let normalized = format!(" {} ", tokens.join(" "));

    let word_points: u32 = KEYWORDS
        .iter()
        .filter(|(kw, _)| distinct.contains(kw))
        .map(|(_, w)| *w)
        .sum();
    let phrase_points: u32 = PHRASES
        .iter()
        .filter(|(p, _)| normalized.contains(&format!(" {} ", p)))
        .map(|(_, w)| *w)
        .sum();

    word_points + phrase_points
}

/// Points for how soon the task is due. Overdue counts as most urgent.
pub fn due_points(due: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u32 {
    let Some(due) = due else {
        return 0;
    };
    let hours_left = (due - now).num_hours();
    match hours_left {
        h if h <= 24 => 4,
        h if h <= 72 => 3,
        h if h <= 24 * 7 => 2,
        h if h <= 24 * 14 => 1,
        _ => 0,
    }
}

pub fn score(
    title: &str,
    description: Option<&str>,
    due: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> u32 {
    let text = match description {
        Some(d) => format!("{} {}", title, d),
        None => title.to_string(),
    };
    keyword_points(&text) + due_points(due, now)
}

/// Priority tier for a task with the given text and due date.
pub fn priority_for(
    title: &str,
    description: Option<&str>,
    due: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Priority {
    Priority::from_score(score(title, description, due, now))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn plain_text_without_due_date_is_none() {
        assert_eq!(priority_for("Buy groceries", None, None, now()), Priority::None);
    }

    #[test]
    fn exam_tomorrow_is_high() {
        let due = Some(now() + Duration::hours(20));
        assert_eq!(priority_for("Chem exam", None, due, now()), Priority::High);
    }

    #[test]
    fn description_counts_and_keywords_count_once() {
        assert_eq!(keyword_points("quiz quiz quiz"), 2);
        assert_eq!(
            priority_for("Chapter 3", Some("urgent: quiz"), None, now()),
            Priority::Medium
        );
    }

    #[test]
    fn phrases_match_on_word_boundaries() {
        assert_eq!(keyword_points("Essay due tomorrow!"), 1 + 1 + 2);
        assert_eq!(keyword_points("overdue tomorrows"), 0);
    }

    #[test]
    fn due_buckets() {
        let n = now();
        assert_eq!(due_points(Some(n - Duration::days(2)), n), 4);
        assert_eq!(due_points(Some(n + Duration::hours(48)), n), 3);
        assert_eq!(due_points(Some(n + Duration::days(6)), n), 2);
        assert_eq!(due_points(Some(n + Duration::days(10)), n), 1);
        assert_eq!(due_points(Some(n + Duration::days(30)), n), 0);
        assert_eq!(due_points(None, n), 0);
    }

    #[test]
    fn adding_keywords_or_closer_due_never_lowers_priority() {
        let n = now();
        let cases = [
            ("Read chapter", "Read chapter before the quiz"),
            ("Project draft", "Urgent project draft for final"),
            ("Lab report", "Important lab report deadline"),
        ];
        let dues = [
            None,
            Some(n + Duration::days(20)),
            Some(n + Duration::days(9)),
            Some(n + Duration::days(5)),
            Some(n + Duration::hours(30)),
            Some(n + Duration::hours(2)),
        ];
        for (a, b) in cases {
            for (i, due_a) in dues.iter().enumerate() {
                for due_b in &dues[i..] {
                    assert!(
                        priority_for(b, None, *due_b, n) >= priority_for(a, None, *due_a, n),
                        "{:?}/{:?} vs {:?}/{:?}",
                        b,
                        due_b,
                        a,
                        due_a
                    );
                }
            }
        }
    }

    #[test]
    fn tier_round_trips_through_storage() {
        for p in [Priority::None, Priority::Low, Priority::Medium, Priority::High] {
            assert_eq!(Priority::from_i64(p.as_i64()), p);
        }
    }
}
