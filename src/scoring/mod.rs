//! Pure scoring heuristics: task priority, profile matching and promotion
//! ranking.

pub mod matching;
pub mod priority;

pub use matching::{match_score, ProfileFacets};
pub use priority::{priority_for, Priority};

pub const MAX_PROMOTION_PRIORITY: i64 = 100;

/// Daily spend scaled to `0..=100`: `min(100, round(10 * budget / days))`.
pub fn promotion_priority(budget: f64, duration_days: i64) -> i64 {
    if duration_days <= 0 || !budget.is_finite() || budget <= 0.0 {
        return 0;
    }
    let raw = (10.0 * budget / duration_days as f64).round();
    (raw as i64).clamp(0, MAX_PROMOTION_PRIORITY)
}
