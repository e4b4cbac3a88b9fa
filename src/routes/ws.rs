//! WebSocket handler: channel pub/sub and live voting rooms.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Frames published to subscribed channels → forward to client
//!
//! Handler functions are business logic only. They validate, mutate state,
//! and return an `Outcome`. The dispatch layer owns all outbound concerns:
//! the frame log, the reply to the sender, and channel publications.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Dispatch applies Outcome (reply / publish / both)
//! 4. Close → leave the current room → part every channel

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, Status};
use crate::services::channel::{self, ChannelError, DEFAULT_MESSAGES_LIMIT, VOTING_ROOMS_CHANNEL};
use crate::services::persistence::enqueue_frame;
use crate::services::voting::{self, VotingError};
use crate::services::session;
use crate::state::AppState;

const CLIENT_QUEUE_CAPACITY: usize = 256;
const ANONYMOUS_NAME: &str = "Anonymous";

// =============================================================================
// OUTCOME
// =============================================================================

/// A channel publication produced by a handler.
struct Event {
    channel: String,
    kind: &'static str,
    data: serde_json::Value,
}

impl Event {
    fn new(channel: impl Into<String>, kind: &'static str, data: impl Serialize) -> Self {
        Self { channel: channel.into(), kind, data: serde_json::to_value(data).unwrap_or_default() }
    }
}

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what. Handlers never send frames directly.
enum Outcome {
    /// Send done+data to sender only.
    Reply(Data),
    /// Send empty done to sender only.
    Done,
    /// Reply to sender, then publish events to channel subscribers other than the sender.
    ReplyAndPublish { reply: Data, events: Vec<Event> },
}

/// Per-connection context.
struct Connection {
    client_id: Uuid,
    user_id: Uuid,
    user_name: String,
    tx: mpsc::Sender<Frame>,
    /// Voting room this connection has joined, if any.
    current_room: Option<Uuid>,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(ticket) = params.get("ticket") else {
        return (StatusCode::UNAUTHORIZED, "ticket required").into_response();
    };

    let user_id = match session::consume_ws_ticket(&state.pool, ticket).await {
        Ok(Some(uid)) => uid,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "invalid or expired ticket").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "ws ticket validation failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "ticket validation error").into_response();
        }
    };

    let user_name = match session::display_name(&state.pool, user_id).await {
        Ok(Some(name)) => name,
        Ok(None) => ANONYMOUS_NAME.to_owned(),
        Err(e) => {
            warn!(error = %e, %user_id, "ws display name lookup failed");
            ANONYMOUS_NAME.to_owned()
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, user_id, user_name))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user_id: Uuid, user_name: String) {
    let client_id = Uuid::new_v4();

    // Per-connection queue for frames published to this client's channels.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(CLIENT_QUEUE_CAPACITY);

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("client_id", client_id.to_string())
        .with_data("user_id", user_id.to_string())
        .with_data("user_name", user_name.clone());
    if send_frame(&mut socket, &state, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, %user_id, "ws: client connected");

    let mut conn = Connection { client_id, user_id, user_name, tx: client_tx, current_room: None };

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &mut conn, &text).await;
                        for frame in replies {
                            let _ = send_frame(&mut socket, &state, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &state, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    disconnect(&state, &mut conn).await;
    info!(%client_id, "ws: client disconnected");
}

/// Leave the current room and part every channel.
async fn disconnect(state: &AppState, conn: &mut Connection) {
    if let Some(room_id) = conn.current_room.take() {
        for event in leave_current_room(state, conn.client_id, room_id).await {
            channel::publish(state, &event.channel, event.kind, event.data, Some(conn.user_id), None).await;
        }
    }
    let parted = channel::unsubscribe_all(state, conn.client_id).await;
    if !parted.is_empty() {
        info!(client_id = %conn.client_id, channels = parted.len(), "ws: parted channels on disconnect");
    }
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Transport concerns stay in `run_ws`, so tests can drive dispatch directly.
async fn process_inbound_text(state: &AppState, conn: &mut Connection, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(client_id = %conn.client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the authenticated user_id as `from`.
    req.from = Some(conn.user_id.to_string());

    info!(client_id = %conn.client_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");
    enqueue_frame(state, &req);

    let result = match req.prefix() {
        "channel" => handle_channel(state, conn, &req).await,
        "room" => handle_room(state, conn, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::ReplyAndPublish { reply, events }) => {
            let sender_frame = req.done_with(reply);
            for event in events {
                channel::publish(state, &event.channel, event.kind, event.data, Some(conn.user_id), Some(conn.client_id))
                    .await;
            }
            vec![sender_frame]
        }
        Err(err_frame) => vec![err_frame],
    }
}

/// Channel name from `data.channel`, falling back to the frame's `channel`.
fn channel_name(req: &Frame) -> Result<String, ChannelError> {
    req.str_field("channel")
        .or(req.channel.as_deref())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_owned)
        .ok_or(ChannelError::MissingChannel)
}

fn to_data(value: serde_json::Value) -> Data {
    match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => Data::new(),
    }
}

// =============================================================================
// CHANNEL HANDLERS
// =============================================================================

async fn handle_channel(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let channel = channel_name(req).map_err(|e| req.error_from(&e))?;

    match req.op() {
        "subscribe" => {
            let metadata = req.data.get("metadata").cloned().unwrap_or_else(|| serde_json::json!({}));
            let presence = channel::subscribe(state, &channel, conn.client_id, conn.user_id, metadata, conn.tx.clone())
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(serde_json::json!({ "channel": channel, "presence": presence }))))
        }
        "unsubscribe" => {
            channel::unsubscribe(state, &channel, conn.client_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Done)
        }
        "publish" => {
            if channel::is_server_owned(&channel) {
                return Err(req.error_from(&ChannelError::Reserved(channel)));
            }
            let kind = req.str_field("type").map(str::trim).unwrap_or("");
            if kind.is_empty() {
                return Err(req.error("type required"));
            }
            let data = req.data.get("data").cloned().unwrap_or(serde_json::Value::Null);
            let msg = channel::publish(state, &channel, kind, data, Some(conn.user_id), Some(conn.client_id)).await;
            Ok(Outcome::Reply(to_data(serde_json::json!({ "message_id": msg.id, "ts": msg.ts }))))
        }
        "presence" => {
            let presence = channel::presence(state, &channel).await;
            Ok(Outcome::Reply(to_data(serde_json::json!({ "channel": channel, "count": presence.len(), "presence": presence }))))
        }
        "messages" => {
            let limit = req
                .data
                .get("limit")
                .and_then(serde_json::Value::as_u64)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(DEFAULT_MESSAGES_LIMIT);
            let messages = channel::messages(state, &channel, limit).await;
            Ok(Outcome::Reply(to_data(serde_json::json!({ "channel": channel, "messages": messages }))))
        }
        op => Err(req.error(format!("unknown channel op: {op}"))),
    }
}

// =============================================================================
// ROOM HANDLERS
// =============================================================================

/// Leave `room_id` and return the events announcing it.
async fn leave_current_room(state: &AppState, client_id: Uuid, room_id: Uuid) -> Vec<Event> {
    let room_channel = channel::voting_room_channel(room_id);
    let _ = channel::unsubscribe(state, &room_channel, client_id).await;
    match voting::leave_room(state, room_id, client_id).await {
        Some(participant) => vec![Event::new(room_channel, "participant_left", participant)],
        None => Vec::new(),
    }
}

/// Room a request targets: `data.room_id`, else the joined room.
fn target_room(conn: &Connection, req: &Frame) -> Result<Uuid, VotingError> {
    req.uuid_field("room_id")
        .or(conn.current_room)
        .ok_or_else(|| VotingError::Validation("room_id required".into()))
}

async fn handle_room(state: &AppState, conn: &mut Connection, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "join" => {
            let room_id = match (req.uuid_field("room_id"), req.str_field("code")) {
                (Some(id), _) => id,
                (None, Some(code)) => voting::find_room_by_code(&state.pool, code)
                    .await
                    .map_err(|e| req.error_from(&e))?
                    .id,
                (None, None) => return Err(req.error_from(&VotingError::Validation("room_id or code required".into()))),
            };

            let mut events = Vec::new();
            if let Some(old_room) = conn.current_room.take() {
                if old_room != room_id {
                    events.extend(leave_current_room(state, conn.client_id, old_room).await);
                }
            }

            let (snapshot, participant) = voting::join_room(state, room_id, conn.user_id, &conn.user_name, conn.client_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            conn.current_room = Some(room_id);

            let room_channel = channel::voting_room_channel(room_id);
            let metadata = serde_json::json!({ "user_name": conn.user_name, "is_manager": participant.is_manager });
            channel::subscribe(state, &room_channel, conn.client_id, conn.user_id, metadata, conn.tx.clone())
                .await
                .map_err(|e| req.error_from(&e))?;

            events.push(Event::new(room_channel, "participant_joined", &participant));
            let reply = to_data(serde_json::json!({ "snapshot": snapshot, "participant": participant }));
            Ok(Outcome::ReplyAndPublish { reply, events })
        }
        "leave" => {
            let Some(room_id) = conn.current_room.take() else {
                return Err(req.error_from(&VotingError::NotInRoom));
            };
            let events = leave_current_room(state, conn.client_id, room_id).await;
            let reply = to_data(serde_json::json!({ "room_id": room_id }));
            Ok(Outcome::ReplyAndPublish { reply, events })
        }
        "start" => {
            let room_id = target_room(conn, req).map_err(|e| req.error_from(&e))?;
            let story = req.str_field("story").unwrap_or("");
            let room = voting::start_voting(state, room_id, conn.user_id, story)
                .await
                .map_err(|e| req.error_from(&e))?;
            let events = vec![
                Event::new(channel::voting_room_channel(room_id), "voting_started", &room),
                Event::new(VOTING_ROOMS_CHANNEL, "room_updated", &room),
            ];
            Ok(Outcome::ReplyAndPublish { reply: to_data(serde_json::json!({ "room": room })), events })
        }
        "end" => {
            let room_id = target_room(conn, req).map_err(|e| req.error_from(&e))?;
            let (snapshot, session) = voting::end_voting(state, room_id, conn.user_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            let payload = serde_json::json!({ "snapshot": snapshot, "session": session });
            let events = vec![
                Event::new(channel::voting_room_channel(room_id), "voting_ended", &payload),
                Event::new(VOTING_ROOMS_CHANNEL, "room_updated", &snapshot.room),
            ];
            Ok(Outcome::ReplyAndPublish { reply: to_data(payload), events })
        }
        "vote" => {
            let room_id = target_room(conn, req).map_err(|e| req.error_from(&e))?;
            let value = req.str_field("value").unwrap_or("");
            let vote = voting::cast_vote(state, room_id, conn.user_id, value)
                .await
                .map_err(|e| req.error_from(&e))?;
            // Peers learn who voted, not what.
            let notice = serde_json::json!({ "user_id": vote.user_id, "user_name": vote.user_name });
            let events = vec![Event::new(channel::voting_room_channel(room_id), "vote_cast", notice)];
            Ok(Outcome::ReplyAndPublish { reply: to_data(serde_json::json!({ "vote": vote })), events })
        }
        "state" => {
            let room_id = target_room(conn, req).map_err(|e| req.error_from(&e))?;
            let snapshot = voting::snapshot(state, room_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(serde_json::json!({ "snapshot": snapshot }))))
        }
        op => Err(req.error(format!("unknown room op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, state: &AppState, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.str_field("code").unwrap_or("-");
        let message = frame.str_field("message").unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    let result = socket.send(Message::Text(json.into())).await.map_err(|_| ());
    if result.is_ok() {
        enqueue_frame(state, frame);
    }
    result
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
