//! Channel service: named pub/sub channels with presence and history.
//!
//! DESIGN
//! ======
//! A channel is created on first subscribe and lives in `AppState::channels`
//! until its last subscriber leaves. Subscribers are keyed by `client_id`, so
//! one user with two tabs is present twice. Publications are appended to a
//! bounded history and fanned out as `channel:message` frames. Publishing to a
//! channel nobody is subscribed to delivers nothing and stores nothing.
//!
//! The two team-wide feeds (`voting-rooms`, `team-activity`) are the
//! exception: their entries are never dropped, so late subscribers can read
//! recent history. The set is fixed, so the map stays bounded.
//!
//! Delivery is best-effort `try_send`: a subscriber whose queue is full
//! misses that frame. Ordering follows the order publishes take the lock.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::frame::{Data, Frame, now_ms};
use crate::state::{AppState, ChannelMessage, ChannelState, Subscriber};

/// Lobby channel: room created/updated notifications.
pub const VOTING_ROOMS_CHANNEL: &str = "voting-rooms";

/// Team-wide activity feed.
pub const TEAM_ACTIVITY_CHANNEL: &str = "team-activity";

/// Default page size for `channel:messages`.
pub const DEFAULT_MESSAGES_LIMIT: usize = 10;

/// Prefixes of channels only the server may publish to.
const SERVER_OWNED_PREFIXES: [&str; 2] = ["voting-room-", "retro-board-"];

#[must_use]
pub fn voting_room_channel(room_id: Uuid) -> String {
    format!("voting-room-{room_id}")
}

#[must_use]
pub fn retro_board_channel(board_id: Uuid) -> String {
    format!("retro-board-{board_id}")
}

#[must_use]
pub fn project_channel(project_id: Uuid) -> String {
    format!("project-{project_id}")
}

/// Room and retro board channels carry server-generated events only.
#[must_use]
pub fn is_server_owned(channel: &str) -> bool {
    SERVER_OWNED_PREFIXES.iter().any(|prefix| channel.starts_with(prefix))
}

/// Channels whose entry (and history) outlives their subscribers.
fn keeps_history(channel: &str) -> bool {
    channel == VOTING_ROOMS_CHANNEL || channel == TEAM_ACTIVITY_CHANNEL
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel name required")]
    MissingChannel,
    #[error("not subscribed to channel: {0}")]
    NotSubscribed(String),
    #[error("channel is server-owned: {0}")]
    Reserved(String),
}

impl crate::frame::ErrorCode for ChannelError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingChannel => "E_CHANNEL_REQUIRED",
            Self::NotSubscribed(_) => "E_NOT_SUBSCRIBED",
            Self::Reserved(_) => "E_CHANNEL_RESERVED",
        }
    }
}

/// One entry in a channel's presence list.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceEntry {
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub metadata: serde_json::Value,
    pub joined_at: i64,
}

fn validate_name(channel: &str) -> Result<&str, ChannelError> {
    let channel = channel.trim();
    if channel.is_empty() {
        return Err(ChannelError::MissingChannel);
    }
    Ok(channel)
}

fn presence_of(channel_state: &ChannelState) -> Vec<PresenceEntry> {
    let mut entries: Vec<PresenceEntry> = channel_state
        .subscribers
        .iter()
        .map(|(client_id, sub)| PresenceEntry {
            client_id: *client_id,
            user_id: sub.user_id,
            metadata: sub.metadata.clone(),
            joined_at: sub.joined_at,
        })
        .collect();
    entries.sort_by_key(|e| (e.joined_at, e.client_id));
    entries
}

fn fan_out(channel_state: &ChannelState, frame: &Frame, exclude: Option<Uuid>) {
    for (client_id, sub) in &channel_state.subscribers {
        if exclude == Some(*client_id) {
            continue;
        }
        // Best-effort: if a client's queue is full, skip it.
        let _ = sub.tx.try_send(frame.clone());
    }
}

/// Subscribe a connection to a channel and return the presence list.
///
/// Re-subscribing the same `client_id` replaces its metadata. Other
/// subscribers receive a `channel:join` frame.
///
/// # Errors
///
/// Returns `MissingChannel` if the name is blank.
pub async fn subscribe(
    state: &AppState,
    channel: &str,
    client_id: Uuid,
    user_id: Uuid,
    metadata: serde_json::Value,
    tx: mpsc::Sender<Frame>,
) -> Result<Vec<PresenceEntry>, ChannelError> {
    let channel = validate_name(channel)?;
    let joined_at = now_ms();

    let mut channels = state.channels.write().await;
    let channel_state = channels.entry(channel.to_owned()).or_default();
    channel_state
        .subscribers
        .insert(client_id, Subscriber { user_id, metadata: metadata.clone(), joined_at, tx });

    let join = Frame::request("channel:join", Data::new())
        .with_channel(channel)
        .with_from(user_id.to_string())
        .with_data("client_id", client_id.to_string())
        .with_data("user_id", user_id.to_string())
        .with_data("metadata", metadata);
    fan_out(channel_state, &join, Some(client_id));

    info!(%channel, %client_id, %user_id, count = channel_state.subscribers.len(), "client subscribed");
    Ok(presence_of(channel_state))
}

/// Remove a connection from a channel. Other subscribers receive `channel:part`.
///
/// The channel is dropped with its history once empty, unless it is one of
/// the team-wide feeds.
///
/// # Errors
///
/// Returns `NotSubscribed` if the connection was not in the channel.
pub async fn unsubscribe(state: &AppState, channel: &str, client_id: Uuid) -> Result<(), ChannelError> {
    let channel = validate_name(channel)?;
    let mut channels = state.channels.write().await;
    let Some(channel_state) = channels.get_mut(channel) else {
        return Err(ChannelError::NotSubscribed(channel.to_owned()));
    };
    let Some(sub) = channel_state.subscribers.remove(&client_id) else {
        return Err(ChannelError::NotSubscribed(channel.to_owned()));
    };

    let part = Frame::request("channel:part", Data::new())
        .with_channel(channel)
        .with_from(sub.user_id.to_string())
        .with_data("client_id", client_id.to_string())
        .with_data("user_id", sub.user_id.to_string());
    fan_out(channel_state, &part, None);

    let remaining = channel_state.subscribers.len();
    if remaining == 0 && !keeps_history(channel) {
        channels.remove(channel);
    }

    info!(%channel, %client_id, remaining, "client unsubscribed");
    Ok(())
}

/// Remove a connection from every channel it joined. Returns the channel names.
pub async fn unsubscribe_all(state: &AppState, client_id: Uuid) -> Vec<String> {
    let joined: Vec<String> = {
        let channels = state.channels.read().await;
        channels
            .iter()
            .filter(|(_, cs)| cs.subscribers.contains_key(&client_id))
            .map(|(name, _)| name.clone())
            .collect()
    };
    for channel in &joined {
        let _ = unsubscribe(state, channel, client_id).await;
    }
    joined
}

/// Build the frame subscribers receive for a publication.
#[must_use]
pub fn message_frame(msg: &ChannelMessage) -> Frame {
    let mut frame = Frame::request("channel:message", Data::new())
        .with_channel(msg.channel.clone())
        .with_data("message_id", msg.id.to_string())
        .with_data("type", msg.kind.clone())
        .with_data("data", msg.data.clone());
    if let Some(user_id) = msg.user_id {
        frame = frame.with_from(user_id.to_string());
    }
    frame.ts = msg.ts;
    frame
}

/// Publish a message to a channel.
///
/// The message is appended to the channel history (trimmed to
/// `channel_history_limit`) and delivered to every subscriber except
/// `exclude`. A channel with no entry is not created: the message is
/// returned but neither stored nor delivered.
pub async fn publish(
    state: &AppState,
    channel: &str,
    kind: &str,
    data: serde_json::Value,
    user_id: Option<Uuid>,
    exclude: Option<Uuid>,
) -> ChannelMessage {
    let msg = ChannelMessage {
        id: Uuid::new_v4(),
        channel: channel.to_owned(),
        kind: kind.to_owned(),
        data,
        user_id,
        ts: now_ms(),
    };
    let frame = message_frame(&msg);

    let mut channels = state.channels.write().await;
    let channel_state = if keeps_history(channel) {
        channels.entry(channel.to_owned()).or_default()
    } else {
        match channels.get_mut(channel) {
            Some(channel_state) => channel_state,
            None => return msg,
        }
    };
    channel_state.history.push_back(msg.clone());
    while channel_state.history.len() > state.channel_history_limit {
        channel_state.history.pop_front();
    }
    fan_out(channel_state, &frame, exclude);

    msg
}

/// Current subscribers of a channel, oldest first. Unknown channels are empty.
pub async fn presence(state: &AppState, channel: &str) -> Vec<PresenceEntry> {
    let channels = state.channels.read().await;
    channels.get(channel).map(presence_of).unwrap_or_default()
}

/// Most recent messages in a channel, newest first.
pub async fn messages(state: &AppState, channel: &str, limit: usize) -> Vec<ChannelMessage> {
    let channels = state.channels.read().await;
    let Some(channel_state) = channels.get(channel) else {
        return Vec::new();
    };
    channel_state.history.iter().rev().take(limit).cloned().collect()
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
