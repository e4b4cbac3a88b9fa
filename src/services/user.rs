//! User profiles and preferences.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::frame::now_ms;

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("user not found: {0}")]
    NotFound(Uuid),
    #[error("{0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for UserError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_USER_NOT_FOUND",
            Self::Validation(_) => "E_VALIDATION",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUpdate {
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    System,
}

/// Notification and display settings. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub email_notifications: bool,
    pub task_updates: bool,
    pub voting_reminders: bool,
    pub retro_invites: bool,
    pub theme: Theme,
    pub language: String,
    pub timezone: String,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            email_notifications: true,
            task_updates: true,
            voting_reminders: true,
            retro_invites: true,
            theme: Theme::Light,
            language: "en".into(),
            timezone: "UTC".into(),
        }
    }
}

impl UserPreferences {
    /// # Errors
    ///
    /// `Validation` if language or timezone is blank.
    pub fn validate(mut self) -> Result<Self, UserError> {
        self.language = self.language.trim().to_owned();
        self.timezone = self.timezone.trim().to_owned();
        if self.language.is_empty() || self.timezone.is_empty() {
            return Err(UserError::Validation("language and timezone are required".into()));
        }
        Ok(self)
    }
}

pub async fn get_profile(pool: &PgPool, user_id: Uuid) -> Result<UserProfile, UserError> {
    let row = sqlx::query(
        "SELECT id, email, display_name, avatar_url, role, created_at, updated_at FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    let Some(r) = row else {
        return Err(UserError::NotFound(user_id));
    };
    Ok(UserProfile {
        id: r.get("id"),
        email: r.get("email"),
        display_name: r.get("display_name"),
        avatar_url: r.get("avatar_url"),
        role: r.get("role"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

/// Set display name and avatar. A blank avatar URL clears it.
pub async fn update_profile(pool: &PgPool, user_id: Uuid, update: ProfileUpdate) -> Result<UserProfile, UserError> {
    let display_name = update.display_name.trim();
    if display_name.is_empty() {
        return Err(UserError::Validation("display name required".into()));
    }
    let avatar_url = update.avatar_url.map(|a| a.trim().to_owned()).filter(|a| !a.is_empty());

    let result = sqlx::query("UPDATE users SET display_name = $2, avatar_url = $3, updated_at = $4 WHERE id = $1")
        .bind(user_id)
        .bind(display_name)
        .bind(&avatar_url)
        .bind(now_ms())
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(UserError::NotFound(user_id));
    }
    get_profile(pool, user_id).await
}

pub async fn get_preferences(pool: &PgPool, user_id: Uuid) -> Result<UserPreferences, UserError> {
    let stored: Option<serde_json::Value> = sqlx::query_scalar("SELECT preferences FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    let Some(stored) = stored else {
        return Err(UserError::NotFound(user_id));
    };
    // Unreadable stored preferences fall back to defaults.
    Ok(serde_json::from_value(stored).unwrap_or_default())
}

pub async fn update_preferences(pool: &PgPool, user_id: Uuid, prefs: UserPreferences) -> Result<UserPreferences, UserError> {
    let prefs = prefs.validate()?;
    let value = serde_json::to_value(&prefs).map_err(|e| UserError::Validation(e.to_string()))?;
    let result = sqlx::query("UPDATE users SET preferences = $2, updated_at = $3 WHERE id = $1")
        .bind(user_id)
        .bind(&value)
        .bind(now_ms())
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(UserError::NotFound(user_id));
    }
    Ok(prefs)
}

pub async fn count_users(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users").fetch_one(pool).await
}
