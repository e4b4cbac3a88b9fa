//! Project routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::services::project::{self, NewProject, Project, ProjectError};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateProjectBody {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub description: Option<String>,
}

pub(crate) fn project_error_to_status(err: ProjectError) -> StatusCode {
    match err {
        ProjectError::NotFound(_) => StatusCode::NOT_FOUND,
        ProjectError::Validation(_) => StatusCode::BAD_REQUEST,
        ProjectError::Database(e) => {
            tracing::error!(error = %e, "project query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// `GET /api/projects`: list projects, newest first.
pub async fn list_projects(State(state): State<AppState>, _auth: AuthUser) -> Result<Json<Vec<Project>>, StatusCode> {
    let projects = project::list_projects(&state.pool).await.map_err(project_error_to_status)?;
    Ok(Json(projects))
}

/// `POST /api/projects`: create a project owned by the caller.
pub async fn create_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateProjectBody>,
) -> Result<(StatusCode, Json<Project>), StatusCode> {
    let input =
        NewProject::parse(&body.name, &body.key, body.description.as_deref()).map_err(project_error_to_status)?;
    let created = project::create_project(&state.pool, input, auth.user.id)
        .await
        .map_err(project_error_to_status)?;
    tracing::info!(project_id = %created.id, key = %created.key, "project created");
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /api/projects/:id`
pub async fn get_project(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Project>, StatusCode> {
    let found = project::get_project(&state.pool, project_id)
        .await
        .map_err(project_error_to_status)?;
    Ok(Json(found))
}

/// `DELETE /api/projects/:id`: delete a project with its sprints and tasks.
pub async fn delete_project(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(project_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    project::delete_project(&state.pool, project_id)
        .await
        .map_err(project_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}
