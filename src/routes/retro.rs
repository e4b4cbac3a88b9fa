//! Retrospective board routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::services::activity::{self, ActivityItem, ActivityKind};
use crate::services::channel::{self, retro_board_channel};
use crate::services::retro::{self, RetroBoard, RetroBoardView, RetroCategory, RetroError, RetroItem, RetroStatus};
use crate::state::AppState;

pub(crate) fn retro_error_to_status(err: RetroError) -> StatusCode {
    match err {
        RetroError::NotFound(_) | RetroError::ItemNotFound(_) => StatusCode::NOT_FOUND,
        RetroError::Validation(_) => StatusCode::BAD_REQUEST,
        RetroError::Forbidden => StatusCode::FORBIDDEN,
        RetroError::BoardClosed(_) => StatusCode::CONFLICT,
        RetroError::Database(e) => {
            tracing::error!(error = %e, "retro query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Deserialize)]
pub struct CreateBoardBody {
    pub name: String,
}

#[derive(Deserialize)]
pub struct AddItemBody {
    pub category: RetroCategory,
    pub content: String,
}

async fn publish(state: &AppState, board_id: Uuid, kind: &str, data: serde_json::Value, user_id: Uuid) {
    channel::publish(state, &retro_board_channel(board_id), kind, data, Some(user_id), None).await;
}

/// `GET /api/retros?include_archived=`: boards, newest first.
pub async fn list_boards(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RetroBoard>>, StatusCode> {
    let boards = retro::list_boards(&state.pool, query.include_archived)
        .await
        .map_err(retro_error_to_status)?;
    Ok(Json(boards))
}

/// `POST /api/retros`: create a board facilitated by the caller.
pub async fn create_board(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateBoardBody>,
) -> Result<(StatusCode, Json<RetroBoard>), StatusCode> {
    let board = retro::create_board(&state.pool, &body.name, auth.user.id)
        .await
        .map_err(retro_error_to_status)?;
    tracing::info!(board_id = %board.id, "retro board created");

    let item = ActivityItem::new(
        ActivityKind::RetroCreated,
        "Retro board created",
        board.name.clone(),
        auth.user.id,
        &auth.user.display_name,
    );
    activity::record(&state, item).await;
    Ok((StatusCode::CREATED, Json(board)))
}

/// `GET /api/retros/:id`: the board with its three columns.
pub async fn get_board(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(board_id): Path<Uuid>,
) -> Result<Json<RetroBoardView>, StatusCode> {
    let board = retro::get_board(&state.pool, board_id)
        .await
        .map_err(retro_error_to_status)?;
    let items = retro::list_items(&state.pool, board_id)
        .await
        .map_err(retro_error_to_status)?;
    Ok(Json(retro::board_view(board, &items)))
}

/// `POST /api/retros/:id/complete`
pub async fn complete_board(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
) -> Result<Json<RetroBoard>, StatusCode> {
    set_status(&state, &auth, board_id, RetroStatus::Completed).await
}

/// `POST /api/retros/:id/archive`
pub async fn archive_board(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
) -> Result<Json<RetroBoard>, StatusCode> {
    set_status(&state, &auth, board_id, RetroStatus::Archived).await
}

async fn set_status(
    state: &AppState,
    auth: &AuthUser,
    board_id: Uuid,
    status: RetroStatus,
) -> Result<Json<RetroBoard>, StatusCode> {
    let board = retro::set_status(&state.pool, board_id, auth.user.id, status)
        .await
        .map_err(retro_error_to_status)?;
    let data = serde_json::to_value(&board).unwrap_or_default();
    publish(state, board_id, "board_updated", data, auth.user.id).await;
    Ok(Json(board))
}

/// `POST /api/retros/:id/items`
pub async fn add_item(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
    Json(body): Json<AddItemBody>,
) -> Result<(StatusCode, Json<RetroItem>), StatusCode> {
    let item = retro::add_item(&state.pool, board_id, auth.user.id, body.category, &body.content)
        .await
        .map_err(retro_error_to_status)?;
    let data = serde_json::to_value(&item).unwrap_or_default();
    publish(&state, board_id, "item_added", data, auth.user.id).await;
    Ok((StatusCode::CREATED, Json(item)))
}

/// `POST /api/retro-items/:id/vote`: `votes += 1`. Repeat votes all count.
pub async fn vote_item(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(item_id): Path<Uuid>,
) -> Result<Json<RetroItem>, StatusCode> {
    let item = retro::vote_item(&state.pool, item_id)
        .await
        .map_err(retro_error_to_status)?;
    let data = serde_json::to_value(&item).unwrap_or_default();
    publish(&state, item.board_id, "item_voted", data, auth.user.id).await;
    Ok(Json(item))
}
