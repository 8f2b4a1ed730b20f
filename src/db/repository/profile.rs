use chrono::{NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::db::models::{Profile, UpdateProfile};
use crate::error::{AppError, AppResult};

/// Raw `profiles` row; list facets are JSON text.
#[derive(FromRow)]
struct ProfileRow {
    user_id: String,
    display_name: String,
    school: Option<String>,
    major: Option<String>,
    graduation_year: Option<i64>,
    interests: String,
    music: String,
    clubs: String,
    bio: Option<String>,
    onboarding_completed: bool,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

fn decode_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!("Discarding malformed profile list {:?}: {}", raw, e);
        Vec::new()
    })
}

fn encode_list(items: &[String]) -> AppResult<String> {
    serde_json::to_string(items).map_err(|e| AppError::Internal(e.into()))
}

/// Trim entries and drop blanks and case-insensitive duplicates.
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
        .collect()
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            user_id: row.user_id,
            display_name: row.display_name,
            school: row.school,
            major: row.major,
            graduation_year: row.graduation_year,
            interests: decode_list(&row.interests),
            music: decode_list(&row.music),
            clubs: decode_list(&row.clubs),
            bio: row.bio,
            onboarding_completed: row.onboarding_completed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const PROFILE_COLUMNS: &str = r#"
    user_id, display_name, school, major, graduation_year, interests, music, clubs,
    bio, onboarding_completed, created_at, updated_at
"#;

pub struct ProfileRepository;

impl ProfileRepository {
    pub async fn find(pool: &SqlitePool, user_id: &str) -> AppResult<Option<Profile>> {
        let sql = format!("SELECT {} FROM profiles WHERE user_id = ?", PROFILE_COLUMNS);
        let row = sqlx::query_as::<_, ProfileRow>(&sql)
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(row.map(Profile::from))
    }

    /// Every profile except `user_id`'s.
    pub async fn list_others(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<Profile>> {
        let sql = format!(
            "SELECT {} FROM profiles WHERE user_id != ? ORDER BY created_at",
            PROFILE_COLUMNS
        );
        let rows = sqlx::query_as::<_, ProfileRow>(&sql)
            .bind(user_id)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(rows.into_iter().map(Profile::from).collect())
    }

    /// Merge `update` into the stored profile, creating it when absent.
    pub async fn upsert(
        pool: &SqlitePool,
        user_id: &str,
        update: UpdateProfile,
    ) -> AppResult<Profile> {
        let now = Utc::now().naive_utc();
        let current = Self::find(pool, user_id).await?;

        let (mut profile, created_at) = match current {
            Some(p) => {
                let created = p.created_at;
                (p, created)
            }
            None => (
                Profile {
                    user_id: user_id.to_string(),
                    display_name: String::new(),
                    school: None,
                    major: None,
                    graduation_year: None,
                    interests: Vec::new(),
                    music: Vec::new(),
                    clubs: Vec::new(),
                    bio: None,
                    onboarding_completed: false,
                    created_at: now,
                    updated_at: now,
                },
                now,
            ),
        };

        if let Some(name) = update.display_name {
            profile.display_name = name.trim().to_string();
        }
        if update.school.is_some() {
            profile.school = update.school;
        }
        if update.major.is_some() {
            profile.major = update.major;
        }
        if update.graduation_year.is_some() {
            profile.graduation_year = update.graduation_year;
        }
        if let Some(items) = update.interests {
            profile.interests = clean_list(items);
        }
        if let Some(items) = update.music {
            profile.music = clean_list(items);
        }
        if let Some(items) = update.clubs {
            profile.clubs = clean_list(items);
        }
        if update.bio.is_some() {
            profile.bio = update.bio;
        }
        if let Some(done) = update.onboarding_completed {
            profile.onboarding_completed = done;
        }

        sqlx::query(
            r#"
            INSERT INTO profiles (
                user_id, display_name, school, major, graduation_year, interests, music, clubs,
                bio, onboarding_completed, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                display_name = excluded.display_name,
                school = excluded.school,
                major = excluded.major,
                graduation_year = excluded.graduation_year,
                interests = excluded.interests,
                music = excluded.music,
                clubs = excluded.clubs,
                bio = excluded.bio,
                onboarding_completed = excluded.onboarding_completed,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&profile.display_name)
        .bind(&profile.school)
        .bind(&profile.major)
        .bind(profile.graduation_year)
        .bind(encode_list(&profile.interests)?)
        .bind(encode_list(&profile.music)?)
        .bind(encode_list(&profile.clubs)?)
        .bind(&profile.bio)
        .bind(profile.onboarding_completed)
        .bind(created_at)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        profile.updated_at = now;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_list_trims_and_dedupes() {
        let cleaned = clean_list(vec![
            " Jazz ".to_string(),
            "jazz".to_string(),
            "".to_string(),
            "Rock".to_string(),
        ]);
        assert_eq!(cleaned, vec!["Jazz".to_string(), "Rock".to_string()]);
    }

    #[test]
    fn malformed_list_decodes_empty() {
        assert!(decode_list("not json").is_empty());
        assert_eq!(decode_list(r#"["a","b"]"#), vec!["a", "b"]);
    }
}
