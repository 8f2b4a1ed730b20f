//! Profile compatibility score used for friend suggestions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

const SCHOOL_POINTS: u32 = 20;
const MAJOR_POINTS: u32 = 20;
const YEAR_POINTS: u32 = 10;
const INTEREST_POINTS: u32 = 8;
const INTEREST_CAP: u32 = 24;
const MUSIC_POINTS: u32 = 5;
const MUSIC_CAP: u32 = 15;
const CLUB_POINTS: u32 = 7;
const CLUB_CAP: u32 = 21;

pub const MAX_SCORE: u32 = 100;

/// The parts of a profile that take part in matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFacets {
    pub school: Option<String>,
    pub major: Option<String>,
    pub graduation_year: Option<i64>,
    pub interests: Vec<String>,
    pub music: Vec<String>,
    pub clubs: Vec<String>,
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn same_text(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            let a = normalize(a);
            !a.is_empty() && a == normalize(b)
        }
        _ => false,
    }
}

fn shared(a: &[String], b: &[String]) -> u32 {
    let left: HashSet<String> = a
        .iter()
        .map(|s| normalize(s))
        .filter(|s| !s.is_empty())
        .collect();
    let right: HashSet<String> = b.iter().map(|s| normalize(s)).collect();
    left.intersection(&right).count() as u32
}

/// Compatibility between two profiles in `0..=100`. Symmetric.
pub fn match_score(a: &ProfileFacets, b: &ProfileFacets) -> u32 {
    let mut score = 0;

    if same_text(&a.school, &b.school) {
        score += SCHOOL_POINTS;
    }
    if same_text(&a.major, &b.major) {
        score += MAJOR_POINTS;
    }
    if a.graduation_year.is_some() && a.graduation_year == b.graduation_year {
        score += YEAR_POINTS;
    }

    score += (shared(&a.interests, &b.interests) * INTEREST_POINTS).min(INTEREST_CAP);
    score += (shared(&a.music, &b.music) * MUSIC_POINTS).min(MUSIC_CAP);
    score += (shared(&a.clubs, &b.clubs) * CLUB_POINTS).min(CLUB_CAP);

    score.min(MAX_SCORE)
}
