//! Dashboard route.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;

use crate::routes::auth::AuthUser;
use crate::services::dashboard::{self, DashboardStats};
use crate::state::AppState;

/// `GET /api/dashboard`: the caller's task counts, team size, and recent activity.
pub async fn dashboard(State(state): State<AppState>, auth: AuthUser) -> Result<Json<DashboardStats>, StatusCode> {
    let stats = dashboard::dashboard_stats(&state.pool, auth.user.id).await.map_err(|e| {
        tracing::error!(error = %e, user_id = %auth.user.id, "dashboard query failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(stats))
}
