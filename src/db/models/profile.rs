use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::scoring::matching::ProfileFacets;

/// A user's public profile. List facets are stored as JSON arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    pub school: Option<String>,
    pub major: Option<String>,
    pub graduation_year: Option<i64>,
    pub interests: Vec<String>,
    pub music: Vec<String>,
    pub clubs: Vec<String>,
    pub bio: Option<String>,
    pub onboarding_completed: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Profile {
    pub fn facets(&self) -> ProfileFacets {
        ProfileFacets {
            school: self.school.clone(),
            major: self.major.clone(),
            graduation_year: self.graduation_year,
            interests: self.interests.clone(),
            music: self.music.clone(),
            clubs: self.clubs.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfile {
    pub display_name: Option<String>,
    pub school: Option<String>,
    pub major: Option<String>,
    pub graduation_year: Option<i64>,
    pub interests: Option<Vec<String>>,
    pub music: Option<Vec<String>>,
    pub clubs: Option<Vec<String>>,
    pub bio: Option<String>,
    pub onboarding_completed: Option<bool>,
}
