//! Sprint routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::routes::tasks::task_error_to_status;
use crate::services::channel::{self, project_channel};
use crate::services::sprint::{self, NewSprint, Sprint, SprintAnalytics, SprintError, SprintStatus};
use crate::services::task;
use crate::state::AppState;

pub(crate) fn sprint_error_to_status(err: SprintError) -> StatusCode {
    match err {
        SprintError::NotFound(_) | SprintError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
        SprintError::Validation(_) => StatusCode::BAD_REQUEST,
        SprintError::Database(e) => {
            tracing::error!(error = %e, "sprint query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// `GET /api/projects/:id/sprints`
pub async fn list_sprints(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Vec<Sprint>>, StatusCode> {
    let sprints = sprint::list_sprints(&state.pool, project_id)
        .await
        .map_err(sprint_error_to_status)?;
    Ok(Json(sprints))
}

/// `POST /api/projects/:id/sprints`: create a planned sprint.
pub async fn create_sprint(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
    Json(body): Json<NewSprint>,
) -> Result<(StatusCode, Json<Sprint>), StatusCode> {
    let input = body.validate().map_err(sprint_error_to_status)?;
    let created = sprint::create_sprint(&state.pool, project_id, input)
        .await
        .map_err(sprint_error_to_status)?;
    publish_sprint(&state, "sprint_created", &created, auth.user.id).await;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `POST /api/sprints/:id/start`
pub async fn start_sprint(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(sprint_id): Path<Uuid>,
) -> Result<Json<Sprint>, StatusCode> {
    set_status(&state, auth, sprint_id, SprintStatus::Active).await
}

/// `POST /api/sprints/:id/complete`
pub async fn complete_sprint(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(sprint_id): Path<Uuid>,
) -> Result<Json<Sprint>, StatusCode> {
    set_status(&state, auth, sprint_id, SprintStatus::Completed).await
}

async fn set_status(
    state: &AppState,
    auth: AuthUser,
    sprint_id: Uuid,
    status: SprintStatus,
) -> Result<Json<Sprint>, StatusCode> {
    let updated = sprint::set_status(&state.pool, sprint_id, status)
        .await
        .map_err(sprint_error_to_status)?;
    tracing::info!(%sprint_id, status = status.as_str(), "sprint status changed");
    publish_sprint(state, "sprint_updated", &updated, auth.user.id).await;
    Ok(Json(updated))
}

/// `GET /api/sprints/:id/analytics`
pub async fn sprint_analytics(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(sprint_id): Path<Uuid>,
) -> Result<Json<SprintAnalytics>, StatusCode> {
    let found = sprint::get_sprint(&state.pool, sprint_id)
        .await
        .map_err(sprint_error_to_status)?;
    let tasks = task::list_tasks(&state.pool, found.project_id)
        .await
        .map_err(task_error_to_status)?;
    Ok(Json(sprint::sprint_analytics(sprint_id, &tasks)))
}

async fn publish_sprint(state: &AppState, kind: &str, sprint: &Sprint, user_id: Uuid) {
    let data = serde_json::to_value(sprint).unwrap_or_default();
    channel::publish(state, &project_channel(sprint.project_id), kind, data, Some(user_id), None).await;
}
