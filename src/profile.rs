use crate::db::{self, StoreError};
use crate::gateway::GenerationContext;
use crate::schema::{
    default_preferences, deserialize_optional_speed, now_rfc3339, LearningSpeed, ProfilePreferences,
};
use rusqlite::Connection;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileUpdate {
    pub user_id: String,
    pub custom_msg: String,
    #[serde(deserialize_with = "deserialize_optional_speed")]
    pub learning_speed: Option<LearningSpeed>,
    pub current_education: String,
    pub country: String,
}

/// Request-supplied context; blank fields fall back to stored preferences.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextOverrides {
    #[serde(alias = "query")]
    pub goal: String,
    pub skills: Vec<String>,
    pub interests: Vec<String>,
    pub education: Option<String>,
    pub country: Option<String>,
    #[serde(alias = "customMsg")]
    pub custom_message: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_speed")]
    pub learning_speed: Option<LearningSpeed>,
}

fn require_user_id(user_id: &str) -> Result<&str, ProfileError> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(ProfileError::Validation("User ID is required.".to_string()));
    }
    Ok(trimmed)
}

pub fn get_or_create_preferences(
    connection: &Connection,
    user_id: &str,
) -> Result<ProfilePreferences, ProfileError> {
    let user_id = require_user_id(user_id)?;
    if let Some(existing) = db::find_profile(connection, user_id)? {
        return Ok(existing);
    }
    let created =
        db::insert_profile_if_absent(connection, &default_preferences(user_id, &now_rfc3339()))?;
    info!(user_id, "created default profile preferences");
    Ok(created)
}

pub fn upsert_preferences(
    connection: &Connection,
    update: ProfileUpdate,
) -> Result<ProfilePreferences, ProfileError> {
    let user_id = require_user_id(&update.user_id)?.to_string();
    let profile = ProfilePreferences {
        user_id,
        custom_msg: update.custom_msg.trim().to_string(),
        learning_speed: update.learning_speed.unwrap_or_default(),
        current_education: update.current_education.trim().to_string(),
        country: update.country.trim().to_string(),
        updated_at: now_rfc3339(),
    };
    db::upsert_profile(connection, &profile)?;
    Ok(profile)
}

/// Stored preferences for `user_id`, or the defaults when none are stored.
/// Never writes; anonymous generation requests pass `None`.
pub fn preferences_or_default(
    connection: &Connection,
    user_id: Option<&str>,
) -> Result<ProfilePreferences, ProfileError> {
    let user_id = user_id.map(str::trim).unwrap_or_default();
    if user_id.is_empty() {
        return Ok(default_preferences("", &now_rfc3339()));
    }
    Ok(db::find_profile(connection, user_id)?
        .unwrap_or_else(|| default_preferences(user_id, &now_rfc3339())))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn build_context(prefs: &ProfilePreferences, overrides: ContextOverrides) -> GenerationContext {
    GenerationContext {
        goal: overrides.goal.trim().to_string(),
        skills: overrides.skills,
        interests: overrides.interests,
        education: non_blank(overrides.education)
            .unwrap_or_else(|| prefs.current_education.clone()),
        country: non_blank(overrides.country).unwrap_or_else(|| prefs.country.clone()),
        custom_message: non_blank(overrides.custom_message)
            .unwrap_or_else(|| prefs.custom_msg.clone()),
        learning_speed: overrides.learning_speed.unwrap_or(prefs.learning_speed),
    }
}
