use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEZONE: &str = "America/New_York";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: String,
    pub timezone: String,
    /// Course label -> `#rrggbb`
    pub course_colors: BTreeMap<String, String>,
    pub auto_sync_enabled: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserSettings {
    pub timezone: Option<String>,
    pub course_colors: Option<BTreeMap<String, String>>,
    pub auto_sync_enabled: Option<bool>,
}
