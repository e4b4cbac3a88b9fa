//! Task routes: list/board/backlog views, edits, comments, links, Jira import.
//!
//! Views load a project's tasks once and shape them with the pure helpers in
//! `services::task`. Mutations publish on the project's channel so open
//! boards refresh, and creation/completion feed the team activity stream.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::routes::sprints::sprint_error_to_status;
use crate::services::activity::{self, ActivityItem, ActivityKind};
use crate::services::channel::{self, project_channel};
use crate::services::jira::{self, IssueSelection, JiraConfig, JiraError};
use crate::services::{project, sprint};
use crate::services::task::{
    self, BacklogView, KanbanColumn, LinkType, NewTask, Task, TaskComment, TaskError, TaskFilter, TaskLink,
    TaskPatch, TaskQuery, TaskStatus,
};
use crate::state::AppState;

pub(crate) fn task_error_to_status(err: TaskError) -> StatusCode {
    match err {
        TaskError::NotFound(_) | TaskError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
        TaskError::Validation(_) => StatusCode::BAD_REQUEST,
        TaskError::Database(e) => {
            tracing::error!(error = %e, "task query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub(crate) fn jira_error_to_status(err: JiraError) -> StatusCode {
    match err {
        JiraError::Validation(_) => StatusCode::BAD_REQUEST,
        JiraError::HttpClientBuild(e) => {
            tracing::error!(error = %e, "jira client unavailable");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        JiraError::Request(_) | JiraError::Response { .. } | JiraError::Parse(_) => {
            tracing::warn!(error = %err, "jira import failed");
            StatusCode::BAD_GATEWAY
        }
        JiraError::Task(e) => task_error_to_status(e),
    }
}

/// Resolve the query against the project's active sprint and apply it.
async fn filtered_tasks(state: &AppState, project_id: Uuid, query: &TaskQuery) -> Result<Vec<Task>, StatusCode> {
    let sprints = sprint::list_sprints(&state.pool, project_id)
        .await
        .map_err(sprint_error_to_status)?;
    let active = sprint::active_sprint(&sprints).map(|s| s.id);
    let filter = TaskFilter::from_query(query, active).map_err(task_error_to_status)?;
    let tasks = task::list_tasks(&state.pool, project_id)
        .await
        .map_err(task_error_to_status)?;
    Ok(task::filter_tasks(&tasks, &filter))
}

async fn publish_task(state: &AppState, kind: &str, task: &Task, user_id: Uuid) {
    let data = serde_json::to_value(task).unwrap_or_default();
    channel::publish(state, &project_channel(task.project_id), kind, data, Some(user_id), None).await;
}

async fn record_completion(state: &AppState, auth: &AuthUser, before: TaskStatus, task: &Task) {
    if before == TaskStatus::Done || task.status != TaskStatus::Done {
        return;
    }
    let item = ActivityItem::new(
        ActivityKind::TaskCompleted,
        "Task completed",
        task.title.clone(),
        auth.user.id,
        &auth.user.display_name,
    );
    activity::record(state, item).await;
}

// =============================================================================
// VIEWS
// =============================================================================

/// `GET /api/projects/:id/tasks?search=&status=&scope=&sprint_id=`
pub async fn list_tasks(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(project_id): Path<Uuid>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Vec<Task>>, StatusCode> {
    Ok(Json(filtered_tasks(&state, project_id, &query).await?))
}

/// `GET /api/projects/:id/board`: Kanban columns over the filtered tasks.
pub async fn board(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(project_id): Path<Uuid>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Vec<KanbanColumn>>, StatusCode> {
    let tasks = filtered_tasks(&state, project_id, &query).await?;
    Ok(Json(task::partition_by_status(&tasks)))
}

/// `GET /api/projects/:id/backlog`: active sprint section, then the backlog.
pub async fn backlog(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(project_id): Path<Uuid>,
) -> Result<Json<BacklogView>, StatusCode> {
    let sprints = sprint::list_sprints(&state.pool, project_id)
        .await
        .map_err(sprint_error_to_status)?;
    let tasks = task::list_tasks(&state.pool, project_id)
        .await
        .map_err(task_error_to_status)?;
    Ok(Json(task::backlog_sections(&sprints, &tasks)))
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// `POST /api/projects/:id/tasks`
pub async fn create_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
    Json(body): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), StatusCode> {
    let created = task::create_task(&state.pool, project_id, body, auth.user.id)
        .await
        .map_err(task_error_to_status)?;
    tracing::info!(task_id = %created.id, %project_id, number = created.task_number, "task created");

    publish_task(&state, "task_created", &created, auth.user.id).await;
    let description = match project::get_project(&state.pool, project_id).await {
        Ok(p) => format!("{}: {}", created.display_key(&p.key), created.title),
        Err(_) => created.title.clone(),
    };
    let item = ActivityItem::new(
        ActivityKind::TaskCreated,
        "New task created",
        description,
        auth.user.id,
        &auth.user.display_name,
    );
    activity::record(&state, item).await;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `PATCH /api/tasks/:id`
pub async fn update_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<Task>, StatusCode> {
    let before = task::get_task(&state.pool, task_id)
        .await
        .map_err(task_error_to_status)?;
    let updated = task::update_task(&state.pool, task_id, patch)
        .await
        .map_err(task_error_to_status)?;
    publish_task(&state, "task_updated", &updated, auth.user.id).await;
    record_completion(&state, &auth, before.status, &updated).await;
    Ok(Json(updated))
}

/// `DELETE /api/tasks/:id`
pub async fn delete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    let existing = task::get_task(&state.pool, task_id)
        .await
        .map_err(task_error_to_status)?;
    task::delete_task(&state.pool, task_id)
        .await
        .map_err(task_error_to_status)?;
    publish_task(&state, "task_deleted", &existing, auth.user.id).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct StatusBody {
    pub status: TaskStatus,
}

/// `POST /api/tasks/:id/status`: move a task to any status.
pub async fn change_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
    Json(body): Json<StatusBody>,
) -> Result<Json<Task>, StatusCode> {
    let before = task::get_task(&state.pool, task_id)
        .await
        .map_err(task_error_to_status)?;
    let updated = task::change_status(&state.pool, task_id, body.status)
        .await
        .map_err(task_error_to_status)?;
    publish_task(&state, "task_updated", &updated, auth.user.id).await;
    record_completion(&state, &auth, before.status, &updated).await;
    Ok(Json(updated))
}

#[derive(Deserialize)]
pub struct DropBody {
    /// `column-<status>` or the id of the task dropped onto.
    pub target: String,
}

/// `POST /api/tasks/:id/drop`: apply a Kanban drag-and-drop.
pub async fn drop_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
    Json(body): Json<DropBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let dragged = task::get_task(&state.pool, task_id)
        .await
        .map_err(task_error_to_status)?;
    let tasks = task::list_tasks(&state.pool, dragged.project_id)
        .await
        .map_err(task_error_to_status)?;

    let Some(status) = task::resolve_drop(&tasks, task_id, &body.target) else {
        return Ok(Json(serde_json::json!({ "changed": false, "task": dragged })));
    };
    let updated = task::change_status(&state.pool, task_id, status)
        .await
        .map_err(task_error_to_status)?;
    publish_task(&state, "task_updated", &updated, auth.user.id).await;
    record_completion(&state, &auth, dragged.status, &updated).await;
    Ok(Json(serde_json::json!({ "changed": true, "task": updated })))
}

// =============================================================================
// COMMENTS & LINKS
// =============================================================================

#[derive(Deserialize)]
pub struct CommentBody {
    pub content: String,
}

/// `GET /api/tasks/:id/comments`
pub async fn list_comments(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Vec<TaskComment>>, StatusCode> {
    let comments = task::list_comments(&state.pool, task_id)
        .await
        .map_err(task_error_to_status)?;
    Ok(Json(comments))
}

/// `POST /api/tasks/:id/comments`
pub async fn add_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
    Json(body): Json<CommentBody>,
) -> Result<(StatusCode, Json<TaskComment>), StatusCode> {
    let comment = task::add_comment(&state.pool, task_id, auth.user.id, &auth.user.display_name, &body.content)
        .await
        .map_err(task_error_to_status)?;
    Ok((StatusCode::CREATED, Json(comment)))
}

#[derive(Deserialize)]
pub struct LinkBody {
    pub linked_task_id: Uuid,
    pub link_type: LinkType,
}

/// `GET /api/tasks/:id/links`
pub async fn list_links(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Vec<TaskLink>>, StatusCode> {
    let links = task::list_links(&state.pool, task_id)
        .await
        .map_err(task_error_to_status)?;
    Ok(Json(links))
}

/// `POST /api/tasks/:id/links`
pub async fn add_link(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(task_id): Path<Uuid>,
    Json(body): Json<LinkBody>,
) -> Result<(StatusCode, Json<TaskLink>), StatusCode> {
    let link = task::add_link(&state.pool, task_id, body.linked_task_id, body.link_type)
        .await
        .map_err(task_error_to_status)?;
    Ok((StatusCode::CREATED, Json(link)))
}

/// `DELETE /api/tasks/:id/links/:linked_id`
pub async fn remove_link(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((task_id, linked_task_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, StatusCode> {
    task::remove_link(&state.pool, task_id, linked_task_id)
        .await
        .map_err(task_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// JIRA IMPORT
// =============================================================================

#[derive(Deserialize)]
pub struct ImportJiraBody {
    pub config: JiraConfig,
    #[serde(default)]
    pub selection: IssueSelection,
}

/// `POST /api/projects/:id/import/jira`: import selected issues as backlog tasks.
pub async fn import_jira(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
    Json(body): Json<ImportJiraBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let imported = jira::import_issues(&state, project_id, auth.user.id, &body.config, &body.selection)
        .await
        .map_err(jira_error_to_status)?;

    if !imported.is_empty() {
        let data = serde_json::json!({ "count": imported.len() });
        channel::publish(&state, &project_channel(project_id), "tasks_imported", data, Some(auth.user.id), None)
            .await;
    }
    Ok(Json(serde_json::json!({ "imported": imported.len(), "tasks": imported })))
}
