//! User profile and preference routes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;

use super::auth::AuthUser;
use crate::services::user::{self, ProfileUpdate, UserError, UserPreferences, UserProfile};
use crate::state::AppState;

pub(crate) fn user_error_to_status(err: UserError) -> StatusCode {
    match err {
        UserError::NotFound(_) => StatusCode::NOT_FOUND,
        UserError::Validation(_) => StatusCode::BAD_REQUEST,
        UserError::Database(e) => {
            tracing::error!(error = %e, "user query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// `GET /api/users/me`
pub async fn get_profile(State(state): State<AppState>, auth: AuthUser) -> Result<Json<UserProfile>, StatusCode> {
    let profile = user::get_profile(&state.pool, auth.user.id)
        .await
        .map_err(user_error_to_status)?;
    Ok(Json(profile))
}

/// `PATCH /api/users/me`: update display name and avatar.
pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<ProfileUpdate>,
) -> Result<Json<UserProfile>, StatusCode> {
    let profile = user::update_profile(&state.pool, auth.user.id, body)
        .await
        .map_err(user_error_to_status)?;
    Ok(Json(profile))
}

/// `GET /api/users/me/preferences`
pub async fn get_preferences(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<UserPreferences>, StatusCode> {
    let prefs = user::get_preferences(&state.pool, auth.user.id)
        .await
        .map_err(user_error_to_status)?;
    Ok(Json(prefs))
}

/// `PUT /api/users/me/preferences`
pub async fn update_preferences(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<UserPreferences>,
) -> Result<Json<UserPreferences>, StatusCode> {
    let prefs = user::update_preferences(&state.pool, auth.user.id, body)
        .await
        .map_err(user_error_to_status)?;
    Ok(Json(prefs))
}
