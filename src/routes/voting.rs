//! Voting room routes. Live round state is driven over the websocket
//! (`room:*` syscalls); these routes cover the lobby and room history.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::services::activity::{self, ActivityItem, ActivityKind};
use crate::services::channel::{self, VOTING_ROOMS_CHANNEL};
use crate::services::voting::{self, RoomSnapshot, VotingError, VotingRoom, VotingSessionRecord};
use crate::state::AppState;

pub(crate) fn voting_error_to_status(err: VotingError) -> StatusCode {
    match err {
        VotingError::NotFound(_) | VotingError::CodeNotFound(_) => StatusCode::NOT_FOUND,
        VotingError::Validation(_) | VotingError::InvalidVote(_) => StatusCode::BAD_REQUEST,
        VotingError::Forbidden | VotingError::NotInRoom => StatusCode::FORBIDDEN,
        VotingError::VotingInactive | VotingError::AlreadyVoted => StatusCode::CONFLICT,
        VotingError::Database(e) => {
            tracing::error!(error = %e, "voting query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Prefer in-memory metadata for rooms that are live and not yet flushed.
async fn overlay_live(state: &AppState, rooms: Vec<VotingRoom>) -> Vec<VotingRoom> {
    let live = state.rooms.read().await;
    rooms
        .into_iter()
        .map(|room| live.get(&room.id).map_or(room, |rs| rs.room.clone()))
        .collect()
}

#[derive(Deserialize)]
pub struct CreateRoomBody {
    pub name: String,
}

/// `GET /api/rooms`: all rooms, newest first.
pub async fn list_rooms(State(state): State<AppState>, _auth: AuthUser) -> Result<Json<Vec<VotingRoom>>, StatusCode> {
    let rooms = voting::list_rooms(&state.pool).await.map_err(voting_error_to_status)?;
    Ok(Json(overlay_live(&state, rooms).await))
}

/// `POST /api/rooms`: create a room managed by the caller.
pub async fn create_room(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateRoomBody>,
) -> Result<(StatusCode, Json<VotingRoom>), StatusCode> {
    let room = voting::create_room(&state.pool, &body.name, auth.user.id)
        .await
        .map_err(voting_error_to_status)?;
    tracing::info!(room_id = %room.id, code = %room.code, "voting room created");

    let data = serde_json::to_value(&room).unwrap_or_default();
    channel::publish(&state, VOTING_ROOMS_CHANNEL, "room_created", data, Some(auth.user.id), None).await;
    let item = ActivityItem::new(
        ActivityKind::VotingStarted,
        "Voting session started",
        room.name.clone(),
        auth.user.id,
        &auth.user.display_name,
    );
    activity::record(&state, item).await;
    Ok((StatusCode::CREATED, Json(room)))
}

/// `GET /api/rooms/code/:code`: look a room up by its share code.
pub async fn find_by_code(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(code): Path<String>,
) -> Result<Json<VotingRoom>, StatusCode> {
    let room = voting::find_room_by_code(&state.pool, &code)
        .await
        .map_err(voting_error_to_status)?;
    let room = voting::live_room(&state, room.id).await.unwrap_or(room);
    Ok(Json(room))
}

/// `GET /api/rooms/:id`: live snapshot, or stored metadata when nobody is in the room.
pub async fn get_room(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomSnapshot>, StatusCode> {
    if let Ok(snapshot) = voting::snapshot(&state, room_id).await {
        return Ok(Json(snapshot));
    }
    let room = voting::get_room(&state.pool, room_id)
        .await
        .map_err(voting_error_to_status)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(RoomSnapshot { room, participants: Vec::new(), votes: Vec::new(), tally: None }))
}

/// `GET /api/rooms/:id/sessions`: finished rounds, newest first.
pub async fn list_sessions(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(room_id): Path<Uuid>,
) -> Result<Json<Vec<VotingSessionRecord>>, StatusCode> {
    let sessions = voting::list_sessions(&state.pool, room_id)
        .await
        .map_err(voting_error_to_status)?;
    Ok(Json(sessions))
}
