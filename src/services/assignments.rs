//! Upcoming assignment / exam selection for the planner view.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{EventType, StoredEvent};
use crate::error::{AppError, AppResult};
use crate::services::canvas::course_of;

pub const DEFAULT_WINDOW_DAYS: i64 = 14;
pub const MAX_WINDOW_DAYS: i64 = 366;

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentFilter {
    /// Look-ahead window from now.
    #[serde(default = "default_window")]
    pub within_days: i64,
    /// Also return items already past due (inside the same window backwards).
    #[serde(default)]
    pub include_past: bool,
    /// Only items whose Canvas course label matches (case-insensitive).
    pub course: Option<String>,
    /// Stored event ids that were already turned into tasks.
    #[serde(skip)]
    pub exclude_event_ids: HashSet<String>,
}

fn default_window() -> i64 {
    DEFAULT_WINDOW_DAYS
}

impl Default for AssignmentFilter {
    fn default() -> Self {
        Self {
            within_days: DEFAULT_WINDOW_DAYS,
            include_past: false,
            course: None,
            exclude_event_ids: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub event_id: String,
    pub title: String,
    pub course: Option<String>,
    pub due: DateTime<Utc>,
    pub event_type: EventType,
    pub source_provider: String,
    pub overdue: bool,
}

/// Assignments and exams due in the window, soonest first.
pub fn filter_assignments(
    events: &[StoredEvent],
    filter: &AssignmentFilter,
    now: DateTime<Utc>,
) -> AppResult<Vec<Assignment>> {
    if filter.within_days > MAX_WINDOW_DAYS {
        return Err(AppError::Validation(format!(
            "within_days must be at most {}",
            MAX_WINDOW_DAYS
        )));
    }
    let window = Duration::try_days(filter.within_days.max(0))
        .ok_or_else(|| AppError::Validation("within_days is out of range".to_string()))?;
    let horizon = now
        .checked_add_signed(window)
        .ok_or_else(|| AppError::Validation("within_days is out of range".to_string()))?;
    let earliest = if filter.include_past {
        now.checked_sub_signed(window)
            .ok_or_else(|| AppError::Validation("within_days is out of range".to_string()))?
    } else {
        now
    };
    let wanted_course = filter.course.as_deref().map(|c| c.trim().to_lowercase());

    let mut out: Vec<Assignment> = events
        .iter()
        .filter(|e| e.event_type().is_assignment_like())
        .filter(|e| !filter.exclude_event_ids.contains(&e.id))
        .filter_map(|e| {
            let due = e.end_utc();
            if due < earliest || due > horizon {
                return None;
            }
            let course = course_of(&e.title);
            if let Some(wanted) = &wanted_course {
                if course.as_deref().map(str::to_lowercase).as_ref() != Some(wanted) {
                    return None;
                }
            }
            Some(Assignment {
                event_id: e.id.clone(),
                title: e.title.clone(),
                course,
                due,
                event_type: e.event_type(),
                source_provider: e.source_provider.clone(),
                overdue: due < now,
            })
        })
        .collect();

    out.sort_by(|a, b| a.due.cmp(&b.due).then_with(|| a.title.cmp(&b.title)));
    Ok(out)
}
