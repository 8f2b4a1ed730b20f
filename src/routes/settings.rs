use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};

use crate::db::models::{UpdateUserSettings, UserSettings};
use crate::db::SettingsRepository;
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::timezone;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_settings).put(update_settings))
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

async fn get_settings(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
) -> AppResult<Json<UserSettings>> {
    Ok(Json(
        SettingsRepository::get(&state.db, &session.user_id).await?,
    ))
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    AuthUser(session): AuthUser,
    Json(mut update): Json<UpdateUserSettings>,
) -> AppResult<Json<UserSettings>> {
    if let Some(tz) = update.timezone.as_deref() {
        let zone = timezone::lookup(tz).ok_or_else(|| {
            AppError::Validation(format!(
                "Unknown timezone '{}'. Supported: {}",
                tz,
                timezone::known_zone_names()
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;
        update.timezone = Some(zone.name.to_string());
    }
    if let Some(colors) = &update.course_colors {
        if let Some((course, color)) = colors.iter().find(|(_, c)| !is_hex_color(c)) {
            return Err(AppError::Validation(format!(
                "Colour '{}' for {} is not #rrggbb",
                color, course
            )));
        }
    }

    let settings = SettingsRepository::update(&state.db, &session.user_id, update).await?;
    tracing::debug!("Updated settings for user {}", session.user_id);
    Ok(Json(settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors() {
        assert!(is_hex_color("#1f77b4"));
        assert!(!is_hex_color("1f77b4"));
        assert!(!is_hex_color("#12345g"));
        assert!(!is_hex_color("#fff"));
    }
}
