//! Canvas-specific helpers: course labels and course colours.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::db::models::{CalendarEvent, Provider};
use crate::db::SettingsRepository;
use crate::error::AppResult;
use crate::ics;
use crate::services::feeds::FeedClient;
use crate::AppState;

lazy_static! {
    // Canvas appends the course code to every summary: "Essay 2 [ENG 101-03]".
    static ref COURSE_SUFFIX: Regex = Regex::new(r"\[([^\]]+)\]\s*$").unwrap();
}

/// Colours handed to courses in first-seen order.
pub const PALETTE: &[&str] = &[
    "#4f46e5", "#0891b2", "#059669", "#d97706", "#dc2626", "#7c3aed", "#db2777", "#65a30d",
    "#0284c7", "#ea580c", "#9333ea", "#0d9488",
];

/// The trailing `[COURSE]` label of a Canvas summary, if any.
pub fn course_of(title: &str) -> Option<String> {
    COURSE_SUFFIX
        .captures(title)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Distinct course labels in feed order.
pub fn courses_in(events: &[CalendarEvent]) -> Vec<String> {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter_map(|e| course_of(&e.title))
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

/// Keep existing colours and give each new course the next palette colour
/// nobody uses yet. Wraps around once the palette is exhausted.
pub fn assign_course_colors(
    existing: &BTreeMap<String, String>,
    courses: &[String],
) -> BTreeMap<String, String> {
    let mut colors = existing.clone();
    let mut used: HashSet<String> = colors.values().map(|c| c.to_lowercase()).collect();
    let mut cursor = 0usize;

    for course in courses {
        if colors.contains_key(course) {
            continue;
        }
        let free = PALETTE
            .iter()
            .find(|c| !used.contains(&c.to_lowercase()))
            .map(|c| c.to_string());
        let color = match free {
            Some(c) => c,
            None => {
                let c = PALETTE[cursor % PALETTE.len()].to_string();
                cursor += 1;
                c
            }
        };
        used.insert(color.to_lowercase());
        colors.insert(course.clone(), color);
    }

    colors
}

/// Read the courses out of a Canvas feed and store colours for the new ones
/// in the user's settings. Returns the full course -> colour map.
pub async fn sync_course_colors(
    state: &Arc<AppState>,
    user_id: &str,
    ics_url: &str,
) -> AppResult<BTreeMap<String, String>> {
    let body = FeedClient::new(state.http.clone()).fetch_ics(ics_url).await?;
    let parsed = ics::parse_ics(&body, Provider::Canvas);
    let courses = courses_in(&parsed.events);

    let mut settings = SettingsRepository::get(&state.db, user_id).await?;
    let colors = assign_course_colors(&settings.course_colors, &courses);
    if colors != settings.course_colors {
        tracing::info!(
            "Assigned colours to {} new course(s) for user {}",
            colors.len() - settings.course_colors.len(),
            user_id
        );
        settings.course_colors = colors.clone();
        SettingsRepository::save(&state.db, &settings).await?;
    }

    Ok(colors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_trailing_label() {
        assert_eq!(course_of("Essay 2 [ENG 101-03]").as_deref(), Some("ENG 101-03"));
        assert_eq!(course_of("Quiz [a] then [BIO 2]  ").as_deref(), Some("BIO 2"));
        assert_eq!(course_of("[CS] Lecture"), None);
        assert_eq!(course_of("Office hours"), None);
    }

    #[test]
    fn existing_colours_are_kept_and_new_ones_skip_used() {
        let mut existing = BTreeMap::new();
        existing.insert("CS 101".to_string(), PALETTE[0].to_string());

        let colors = assign_course_colors(
            &existing,
            &["MATH 2".to_string(), "CS 101".to_string(), "BIO 1".to_string()],
        );
        assert_eq!(colors["CS 101"], PALETTE[0]);
        assert_eq!(colors["MATH 2"], PALETTE[1]);
        assert_eq!(colors["BIO 1"], PALETTE[2]);
    }

    #[test]
    fn palette_wraps_when_exhausted() {
        let courses: Vec<String> = (0..PALETTE.len() + 2).map(|i| format!("C{}", i)).collect();
        let colors = assign_course_colors(&BTreeMap::new(), &courses);
        assert_eq!(colors.len(), courses.len());
        assert_eq!(colors[&format!("C{}", PALETTE.len())], PALETTE[0]);
    }
}
